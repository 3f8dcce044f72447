//! Compact ("bits") target encoding and difficulty conversion.
//!
//! A compact target packs an arbitrarily large integer into 32 bits:
//! `[exponent (1 byte)][sign (1 bit)][mantissa (23 bits)]`, with
//! `value = sign * mantissa * 256^(exponent - 3)`. Only the top 23 bits of
//! the value survive encoding.

use core::fmt;

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{FromPrimitive, Zero};
use serde::{Deserialize, Serialize};

use crate::error::KernelError;

const SIGN_BIT: u32 = 0x0080_0000;
const MANTISSA_MASK: u32 = 0x007F_FFFF;

/// Exponent of the difficulty-1 target, `0x1d00ffff`.
const DIFF_ONE_EXPONENT: u32 = 29;

/// Mantissa of the difficulty-1 target.
const DIFF_ONE_MANTISSA: f64 = 65_535.0;

/// Integral size a sub-one difficulty quotient is scaled to.
const MIN_SCALED_MANTISSA: f64 = 16_777_216.0;

/// A 256-bit (or larger) target in compact form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompactTarget(pub u32);

impl CompactTarget {
    /// Raw 32-bit representation.
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Byte-length exponent (top 8 bits).
    #[inline]
    pub const fn exponent(self) -> u32 {
        self.0 >> 24
    }

    /// 23-bit mantissa.
    #[inline]
    pub const fn mantissa(self) -> u32 {
        self.0 & MANTISSA_MASK
    }

    /// Whether the sign flag is set.
    #[inline]
    pub const fn is_negative(self) -> bool {
        self.0 & SIGN_BIT != 0
    }

    /// Encode a signed integer.
    ///
    /// Precision beyond the top 23 mantissa bits is dropped. When the top
    /// mantissa bit would collide with the sign flag the mantissa moves one
    /// byte right and the exponent grows by one.
    pub fn encode(n: &BigInt) -> Self {
        if n.is_zero() {
            return CompactTarget(0);
        }

        let magnitude = n.magnitude();
        let mut exponent = ((magnitude.bits() + 7) / 8) as u32;
        let mut mantissa = if exponent <= 3 {
            low_u32(magnitude) << (8 * (3 - exponent))
        } else {
            low_u32(&(magnitude >> (8 * (exponent - 3)) as usize))
        };

        if mantissa & SIGN_BIT != 0 {
            mantissa >>= 8;
            exponent += 1;
        }

        let mut compact = (exponent << 24) | mantissa;
        if n.sign() == Sign::Minus {
            compact |= SIGN_BIT;
        }
        CompactTarget(compact)
    }

    /// Encode an unsigned target.
    pub fn from_target(target: &BigUint) -> Self {
        Self::encode(&BigInt::from_biguint(Sign::Plus, target.clone()))
    }

    /// Decode to a signed integer. The sign flag negates the value.
    pub fn decode(self) -> BigInt {
        let magnitude = self.magnitude();
        if self.is_negative() {
            -BigInt::from(magnitude)
        } else {
            BigInt::from(magnitude)
        }
    }

    /// Decode, rejecting negative values and exponents below 3 whose
    /// mantissa would lose set bits to the right shift.
    pub fn decode_strict(self) -> Result<BigUint, KernelError> {
        let exponent = self.exponent();
        let mantissa = self.mantissa();

        if self.is_negative() && mantissa != 0 {
            return Err(KernelError::MalformedCompactTarget(self.0));
        }
        if exponent < 3 && mantissa & ((1u32 << (8 * (3 - exponent))) - 1) != 0 {
            return Err(KernelError::MalformedCompactTarget(self.0));
        }

        Ok(self.magnitude())
    }

    fn magnitude(self) -> BigUint {
        let exponent = self.exponent();
        let mantissa = self.mantissa();
        if exponent <= 3 {
            BigUint::from(mantissa >> (8 * (3 - exponent)))
        } else {
            BigUint::from(mantissa) << (8 * (exponent - 3)) as usize
        }
    }

    /// Next larger compact value at the current precision.
    ///
    /// Adds one unit in the last mantissa place and renormalizes the same
    /// way `encode` does. The sign flag is carried through unchanged.
    pub fn increment(self) -> Self {
        let sign = self.0 & SIGN_BIT;
        let mut exponent = self.exponent();
        let mut mantissa = self.mantissa();

        if exponent <= 3 {
            mantissa += 1 << (8 * (3 - exponent));
        } else {
            mantissa += 1;
        }

        if mantissa >= SIGN_BIT {
            mantissa >>= 8;
            exponent += 1;
        }

        CompactTarget((exponent << 24) | mantissa | sign)
    }

    /// Difficulty relative to the difficulty-1 target (`0x1d00ffff`).
    ///
    /// The divisor takes the low 24 bits, sign flag included, and a zero
    /// mantissa yields infinity.
    pub fn to_difficulty(self) -> f64 {
        let mut shift = self.exponent();
        let mut difficulty = DIFF_ONE_MANTISSA / f64::from(self.0 & 0x00FF_FFFF);

        while shift < DIFF_ONE_EXPONENT {
            difficulty *= 256.0;
            shift += 1;
        }
        while shift > DIFF_ONE_EXPONENT {
            difficulty /= 256.0;
            shift -= 1;
        }

        difficulty
    }

    /// Compact target for a difficulty; shorthand for
    /// `from_target(&from_difficulty(d)?)`.
    pub fn for_difficulty(difficulty: f64) -> Result<Self, KernelError> {
        Ok(Self::from_target(&from_difficulty(difficulty)?))
    }
}

impl From<u32> for CompactTarget {
    fn from(bits: u32) -> Self {
        CompactTarget(bits)
    }
}

impl From<CompactTarget> for u32 {
    fn from(compact: CompactTarget) -> Self {
        compact.0
    }
}

impl fmt::Display for CompactTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Full target for a difficulty, the inverse of [`CompactTarget::to_difficulty`].
///
/// The quotient `0xffff / difficulty` is scaled to an integer one byte at
/// a time before being shifted into place, so that fractional digits
/// survive the conversion. Quotients below one are scaled up until at
/// least 24 bits are integral. Any positive finite difficulty whose
/// target is at least one is accepted; beyond that (around `2.7e67`)
/// the target would be zero and the difficulty is rejected.
pub fn from_difficulty(difficulty: f64) -> Result<BigUint, KernelError> {
    if !difficulty.is_finite() || difficulty <= 0.0 {
        return Err(KernelError::InvalidDifficulty(difficulty));
    }

    let mut mantissa = DIFF_ONE_MANTISSA / difficulty;
    let mut exponent: i64 = 1;
    if mantissa >= 1.0 {
        let mut normalized = mantissa;
        while normalized >= 256.0 {
            normalized /= 256.0;
            exponent += 1;
        }
        for _ in 0..exponent {
            mantissa *= 256.0;
        }
    } else {
        exponent = 0;
        while mantissa > 0.0 && mantissa < MIN_SCALED_MANTISSA {
            mantissa *= 256.0;
            exponent += 1;
        }
    }

    let base = BigUint::from_f64(mantissa).ok_or(KernelError::InvalidDifficulty(difficulty))?;
    let shift = (26 - exponent) * 8;
    let target = if shift >= 0 {
        base << shift as usize
    } else {
        base >> (-shift) as usize
    };
    if target.is_zero() {
        return Err(KernelError::InvalidDifficulty(difficulty));
    }
    Ok(target)
}

/// Format difficulty for display (e.g., "1.23T" for trillion).
pub fn format_difficulty(difficulty: f64) -> String {
    if difficulty >= 1e15 {
        format!("{:.2}P", difficulty / 1e15)
    } else if difficulty >= 1e12 {
        format!("{:.2}T", difficulty / 1e12)
    } else if difficulty >= 1e9 {
        format!("{:.2}G", difficulty / 1e9)
    } else if difficulty >= 1e6 {
        format!("{:.2}M", difficulty / 1e6)
    } else if difficulty >= 1e3 {
        format!("{:.2}K", difficulty / 1e3)
    } else {
        format!("{:.2}", difficulty)
    }
}

fn low_u32(n: &BigUint) -> u32 {
    n.iter_u32_digits().next().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::ToPrimitive;

    fn big(n: u64) -> BigInt {
        BigInt::from(n)
    }

    #[test]
    fn test_decode_genesis() {
        // 0x1d00ffff = 0xffff * 256^26
        let target = CompactTarget(0x1d00ffff).decode();
        let expected = BigInt::from(0xffffu32) << 208usize;
        assert_eq!(target, expected);

        let bytes = target.magnitude().to_bytes_be();
        assert_eq!(bytes.len(), 28);
        assert_eq!(&bytes[..2], &[0xff, 0xff]);
        assert!(bytes[2..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_decode_small_exponents() {
        assert_eq!(CompactTarget(0x01120000).decode(), big(0x12));
        assert_eq!(CompactTarget(0x02123400).decode(), big(0x1234));
        assert_eq!(CompactTarget(0x03123456).decode(), big(0x123456));
        assert_eq!(CompactTarget(0x04123456).decode(), big(0x12345600));
    }

    #[test]
    fn test_zero() {
        assert_eq!(CompactTarget::encode(&BigInt::zero()), CompactTarget(0));
        assert!(CompactTarget(0).decode().is_zero());
        // Exponent zero shifts any mantissa away.
        assert!(CompactTarget(0x00123456).decode().is_zero());
    }

    #[test]
    fn test_encode_known_values() {
        let cases: [(u64, u32); 8] = [
            (0x1, 0x01010000),
            (0x12, 0x01120000),
            (0x123, 0x02012300),
            (0x12345, 0x03012345),
            (0x80, 0x02008000),
            (0x8000, 0x03008000),
            (0x800000, 0x04008000),
            (0x123456789, 0x05012345),
        ];
        for (n, bits) in cases {
            assert_eq!(CompactTarget::encode(&big(n)).bits(), bits, "encode {:#x}", n);
        }
    }

    #[test]
    fn test_roundtrip_truncates_to_mantissa() {
        // Exactly representable values survive.
        for bits in [0x1d00ffffu32, 0x1c147e17, 0x1b0404cb, 0x17034219] {
            let c = CompactTarget(bits);
            assert_eq!(CompactTarget::encode(&c.decode()), c, "roundtrip {}", c);
        }

        // Low-order bytes beyond the mantissa are dropped.
        let decoded = CompactTarget::encode(&big(0x123456789)).decode();
        assert_eq!(decoded, big(0x123450000));
    }

    #[test]
    fn test_negative_values() {
        let n = -big(0x123456);
        let c = CompactTarget::encode(&n);
        assert_eq!(c.bits(), 0x03923456);
        assert!(c.is_negative());
        assert_eq!(c.decode(), n);
    }

    #[test]
    fn test_decode_strict() {
        assert_eq!(
            CompactTarget(0x1d00ffff).decode_strict().unwrap(),
            BigUint::from(0xffffu32) << 208usize
        );
        assert_eq!(CompactTarget(0x01120000).decode_strict().unwrap(), BigUint::from(0x12u32));
        assert_eq!(
            CompactTarget(0x01123456).decode_strict(),
            Err(KernelError::MalformedCompactTarget(0x01123456))
        );
        assert_eq!(
            CompactTarget(0x04923456).decode_strict(),
            Err(KernelError::MalformedCompactTarget(0x04923456))
        );
    }

    /// Expected successor: add one unit in the last representable place of
    /// the decoded value and re-encode.
    fn expected_increment(num: u64) -> CompactTarget {
        let next = if num < 0x800000 {
            num + 1
        } else {
            let bytes = (64 - num.leading_zeros()) / 8 + 1;
            num + (1u64 << (8 * (bytes - 3)))
        };
        CompactTarget::encode(&big(next))
    }

    #[test]
    fn test_increment_matches_reencoding() {
        let rounded = CompactTarget::encode(&big(0x1234567)).decode();
        let rounded = rounded.to_u64().unwrap();

        let nums = [
            0x1,
            0x2,
            0x12,
            0x123,
            0x1234,
            0x12345,
            0x123456,
            0x800000,
            rounded,
            rounded - 1,
            0x1234567,
            0x7fffff,
            0x7ffffffff,
        ];
        for num in nums {
            let c0 = CompactTarget::encode(&big(num));
            let want = expected_increment(num);
            assert_ne!(c0, want, "bad fixture for {:#x}", num);
            assert_eq!(c0.increment(), want, "increment of {} ({:#x})", c0, num);
        }
    }

    #[test]
    fn test_increment_is_monotonic() {
        let samples = [
            0x01010000u32,
            0x017f0000,
            0x02008000,
            0x027fff00,
            0x03000001,
            0x037fffff,
            0x04008000,
            0x047fffff,
            0x1b0404cb,
            0x1c147e17,
            0x1d00ffff,
            0x1d7fffff,
            0x20123456,
        ];
        for bits in samples {
            let c = CompactTarget(bits);
            assert!(c.increment().decode() > c.decode(), "increment of {}", c);
        }
    }

    #[test]
    fn test_increment_keeps_sign() {
        let c = CompactTarget(0x04923456);
        assert_eq!(c.increment().bits(), 0x04923457);
    }

    #[test]
    fn test_difficulty_of_genesis() {
        let diff = CompactTarget(0x1d00ffff).to_difficulty();
        assert!((diff - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_difficulty_roundtrip() {
        for bits in [0x1c147e17u32, 0x1d00ffff, 0x1c0fffff, 0x1c13dc6f, 0x1c143aa3] {
            let c = CompactTarget(bits);
            let back = CompactTarget::for_difficulty(c.to_difficulty()).unwrap();
            assert_eq!(back, c, "difficulty roundtrip for {}", c);
        }
    }

    #[test]
    fn test_high_difficulty_keeps_precision() {
        for difficulty in [65_536.0, 1e6, 1.6e7, 2e7, 1e9, 1e12] {
            let c = CompactTarget::for_difficulty(difficulty).unwrap();
            assert_ne!(c.bits(), 0, "difficulty {}", difficulty);
            let back = c.to_difficulty();
            assert!(
                ((back - difficulty) / difficulty).abs() < 1e-4,
                "difficulty {} came back as {} via {}",
                difficulty,
                back,
                c
            );
        }
    }

    #[test]
    fn test_from_difficulty_rejects_zero_target() {
        assert_eq!(
            from_difficulty(1e70),
            Err(KernelError::InvalidDifficulty(1e70))
        );
        assert!(from_difficulty(1e60).is_ok());
    }

    #[test]
    fn test_from_difficulty_rejects_nonpositive() {
        assert!(from_difficulty(0.0).is_err());
        assert!(from_difficulty(-2.5).is_err());
        assert!(from_difficulty(f64::NAN).is_err());
        assert!(from_difficulty(f64::INFINITY).is_err());
    }

    #[test]
    fn test_format_difficulty() {
        assert_eq!(format_difficulty(12.49), "12.49");
        assert_eq!(format_difficulty(16_307.4), "16.31K");
        assert_eq!(format_difficulty(2.5e12), "2.50T");
    }

    #[test]
    fn test_display() {
        assert_eq!(CompactTarget(0x1c147e17).to_string(), "1c147e17");
    }
}
