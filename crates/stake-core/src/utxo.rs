//! Persisted unspent output records and their key layout.
//!
//! Keys start with a one-byte record tag:
//! - `DB_UTXO ++ txid (32) ++ index (u32 LE)` maps to an encoded [`UtxoRecord`].
//! - `DB_ADDR ++ script hash (20) ++ txid ++ index` maps to the output's
//!   `DB_UTXO` key, so one prefix scan lists an address's outputs.
//! - `DB_HEIGHT` alone maps to the store's [`ChainTip`].
//!
//! All integers are little-endian.

use core::fmt;
use core::str::FromStr;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::compact::CompactTarget;
use crate::error::StoreError;
use crate::hash::{hash_from_display_hex, hash_to_display_hex};
use crate::kernel::KernelTemplate;
use crate::network::KernelParams;

/// Tag of output records.
pub const DB_UTXO: u8 = 0;
/// Tag of address index entries.
pub const DB_ADDR: u8 = 1;
/// Key of the store metadata record.
pub const DB_HEIGHT: u8 = 2;

/// Length of an output record key.
pub const OUTPOINT_KEY_LEN: usize = 1 + 32 + 4;
/// Length of a script hash.
pub const SCRIPT_HASH_LEN: usize = 20;
/// Fixed part of an encoded output record, before the script.
const UTXO_FIXED_LEN: usize = 4 + 8 + 4 + 4 + 8;
const CHAIN_TIP_LEN: usize = 8;

/// Reference to a transaction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    /// Transaction id in internal byte order.
    pub txid: [u8; 32],
    /// Output index.
    pub index: u32,
}

impl OutPoint {
    pub fn new(txid: [u8; 32], index: u32) -> Self {
        OutPoint { txid, index }
    }

    /// Output record key.
    pub fn key(&self) -> [u8; OUTPOINT_KEY_LEN] {
        let mut key = [0u8; OUTPOINT_KEY_LEN];
        key[0] = DB_UTXO;
        key[1..33].copy_from_slice(&self.txid);
        key[33..].copy_from_slice(&self.index.to_le_bytes());
        key
    }

    /// Parse an output record key.
    pub fn from_key(key: &[u8]) -> Result<Self, StoreError> {
        if key.len() != OUTPOINT_KEY_LEN || key[0] != DB_UTXO {
            return Err(StoreError::Corrupt {
                what: "outpoint",
                reason: format!("bad key of {} bytes", key.len()),
            });
        }
        let mut txid = [0u8; 32];
        txid.copy_from_slice(&key[1..33]);
        let mut index = [0u8; 4];
        index.copy_from_slice(&key[33..]);
        Ok(OutPoint {
            txid,
            index: u32::from_le_bytes(index),
        })
    }
}

/// `txid:index` with the txid in display (reversed) hex.
impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", hash_to_display_hex(&self.txid), self.index)
    }
}

/// Error parsing a `txid:index` string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseOutPointError {
    #[error("expected TXID:INDEX, got {0:?}")]
    Format(String),
    #[error("invalid txid {0:?}")]
    Txid(String),
    #[error("invalid output index {0:?}")]
    Index(String),
}

impl FromStr for OutPoint {
    type Err = ParseOutPointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (txid, index) = s
            .split_once(':')
            .ok_or_else(|| ParseOutPointError::Format(s.to_string()))?;
        let txid = hash_from_display_hex(txid)
            .ok_or_else(|| ParseOutPointError::Txid(txid.to_string()))?;
        let index = index
            .parse::<u32>()
            .map_err(|_| ParseOutPointError::Index(index.to_string()))?;
        Ok(OutPoint { txid, index })
    }
}

/// HASH160 of an output script's public key, used to group outputs by
/// address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScriptHash(pub [u8; SCRIPT_HASH_LEN]);

impl ScriptHash {
    /// Extract the key hash from a P2PKH script
    /// (`OP_DUP OP_HASH160 <20 bytes> OP_EQUALVERIFY OP_CHECKSIG`).
    pub fn from_p2pkh_script(script: &[u8]) -> Option<Self> {
        match script {
            [0x76, 0xa9, 0x14, hash @ .., 0x88, 0xac] if hash.len() == SCRIPT_HASH_LEN => {
                let mut out = [0u8; SCRIPT_HASH_LEN];
                out.copy_from_slice(hash);
                Some(ScriptHash(out))
            }
            _ => None,
        }
    }

    /// Prefix shared by all index entries of this script hash.
    pub fn index_prefix(&self) -> [u8; 1 + SCRIPT_HASH_LEN] {
        let mut prefix = [0u8; 1 + SCRIPT_HASH_LEN];
        prefix[0] = DB_ADDR;
        prefix[1..].copy_from_slice(&self.0);
        prefix
    }

    /// Index entry key for one output.
    pub fn index_key(&self, outpoint: &OutPoint) -> Vec<u8> {
        let mut key = Vec::with_capacity(1 + SCRIPT_HASH_LEN + OUTPOINT_KEY_LEN - 1);
        key.extend_from_slice(&self.index_prefix());
        key.extend_from_slice(&outpoint.key()[1..]);
        key
    }
}

impl fmt::Display for ScriptHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for ScriptHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; SCRIPT_HASH_LEN];
        hex::decode_to_slice(s, &mut out)?;
        Ok(ScriptHash(out))
    }
}

/// Everything the kernel check needs to know about one unspent output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UtxoRecord {
    /// Time of the containing block.
    pub block_time: u32,
    /// Stake modifier for the containing block.
    pub stake_modifier: u64,
    /// Offset of the transaction inside its block.
    pub offset_in_block: u32,
    /// Transaction time.
    pub time: u32,
    /// Output value in smallest units.
    pub value: u64,
    /// Output script, base64 in JSON.
    #[serde(serialize_with = "script_to_base64", deserialize_with = "script_from_base64")]
    pub pk_script: Vec<u8>,
}

impl UtxoRecord {
    /// Encode as a store value.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(UTXO_FIXED_LEN + self.pk_script.len());
        buf.extend_from_slice(&self.block_time.to_le_bytes());
        buf.extend_from_slice(&self.stake_modifier.to_le_bytes());
        buf.extend_from_slice(&self.offset_in_block.to_le_bytes());
        buf.extend_from_slice(&self.time.to_le_bytes());
        buf.extend_from_slice(&self.value.to_le_bytes());
        buf.extend_from_slice(&self.pk_script);
        buf
    }

    /// Decode a store value. Everything past the fixed fields is the script.
    pub fn decode(buf: &[u8]) -> Result<Self, StoreError> {
        if buf.len() < UTXO_FIXED_LEN {
            return Err(StoreError::Corrupt {
                what: "utxo",
                reason: format!("{} bytes, need at least {}", buf.len(), UTXO_FIXED_LEN),
            });
        }
        Ok(UtxoRecord {
            block_time: le_u32(&buf[0..4]),
            stake_modifier: le_u64(&buf[4..12]),
            offset_in_block: le_u32(&buf[12..16]),
            time: le_u32(&buf[16..20]),
            value: le_u64(&buf[20..28]),
            pk_script: buf[UTXO_FIXED_LEN..].to_vec(),
        })
    }

    /// Script hash for the address index, if the script is P2PKH.
    pub fn script_hash(&self) -> Option<ScriptHash> {
        ScriptHash::from_p2pkh_script(&self.pk_script)
    }

    /// Kernel template for staking this output at `tx_time`.
    pub fn kernel_template(
        &self,
        outpoint: &OutPoint,
        bits: CompactTarget,
        params: &KernelParams,
        tx_time: i64,
    ) -> Result<KernelTemplate, StoreError> {
        let value = i64::try_from(self.value).map_err(|_| StoreError::Corrupt {
            what: "utxo",
            reason: format!("value {} out of range", self.value),
        })?;
        Ok(KernelTemplate {
            bits,
            block_from_time: i64::from(self.block_time),
            tx_time,
            stake_modifier: self.stake_modifier,
            prev_tx_offset: self.offset_in_block,
            prev_tx_time: i64::from(self.time),
            prev_tx_out_index: outpoint.index,
            prev_tx_out_value: value,
            is_protocol_v03: params.is_protocol_v03(tx_time),
            stake_min_age: params.stake_min_age,
        })
    }

    /// Store entries for this record: the output record itself and, for
    /// P2PKH scripts, its address index entry.
    pub fn store_entries(&self, outpoint: &OutPoint) -> Vec<(Vec<u8>, Vec<u8>)> {
        let key = outpoint.key().to_vec();
        let mut entries = Vec::with_capacity(2);
        if let Some(script_hash) = self.script_hash() {
            entries.push((script_hash.index_key(outpoint), key.clone()));
        }
        entries.push((key, self.encode()));
        entries
    }
}

/// Height and time of the newest block reflected in a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTip {
    pub height: u32,
    pub time: u32,
}

impl ChainTip {
    /// Key of the metadata record.
    pub const KEY: [u8; 1] = [DB_HEIGHT];

    pub fn encode(&self) -> [u8; CHAIN_TIP_LEN] {
        let mut buf = [0u8; CHAIN_TIP_LEN];
        buf[0..4].copy_from_slice(&self.height.to_le_bytes());
        buf[4..8].copy_from_slice(&self.time.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, StoreError> {
        if buf.len() < CHAIN_TIP_LEN {
            return Err(StoreError::Corrupt {
                what: "height",
                reason: format!("invalid record length {}", buf.len()),
            });
        }
        Ok(ChainTip {
            height: le_u32(&buf[0..4]),
            time: le_u32(&buf[4..8]),
        })
    }
}

fn le_u32(b: &[u8]) -> u32 {
    let mut out = [0u8; 4];
    out.copy_from_slice(b);
    u32::from_le_bytes(out)
}

fn le_u64(b: &[u8]) -> u64 {
    let mut out = [0u8; 8];
    out.copy_from_slice(b);
    u64::from_le_bytes(out)
}

fn script_to_base64<S: Serializer>(script: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(script))
}

fn script_from_base64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let s = String::deserialize(deserializer)?;
    STANDARD.decode(s).map_err(serde::de::Error::custom)
}
