//! SHA256 double-hashing and hash display helpers.

use sha2::{Digest, Sha256};

/// Double SHA256: SHA256(SHA256(data)).
///
/// Kernel hashes, transaction ids and block hashes all use this.
#[inline]
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut result = [0u8; 32];
    result.copy_from_slice(&second);
    result
}

/// Reverse the byte order of a 32-byte array.
///
/// Transaction ids are displayed in reverse byte order.
#[inline]
pub fn reverse_bytes(bytes: &[u8; 32]) -> [u8; 32] {
    let mut reversed = *bytes;
    reversed.reverse();
    reversed
}

/// Convert an internal-order hash to its display format (reversed hex).
pub fn hash_to_display_hex(hash: &[u8; 32]) -> String {
    hex::encode(reverse_bytes(hash))
}

/// Parse a display-format (reversed hex) hash into internal order.
pub fn hash_from_display_hex(s: &str) -> Option<[u8; 32]> {
    let bytes = hex::decode(s).ok()?;
    let display: [u8; 32] = bytes.try_into().ok()?;
    Some(reverse_bytes(&display))
}

/// Number of significant bits in a hash read as a big-endian integer.
///
/// A kernel hash with fewer significant bits is "luckier"; this is the
/// figure reported alongside each found kernel.
pub fn significant_bits(hash: &[u8; 32]) -> u32 {
    let mut zeros = 0u32;
    for byte in hash.iter() {
        if *byte == 0 {
            zeros += 8;
        } else {
            zeros += byte.leading_zeros();
            break;
        }
    }
    256 - zeros
}
