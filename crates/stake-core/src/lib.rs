//! Core proof-of-stake kernel logic for the stake kernel finder.
//!
//! This crate provides pure Rust implementations of:
//! - Compact ("bits") target encoding and difficulty conversion
//! - Coin-day weight of a staked output
//! - Stake kernel serialization and hash check (v0.2 and v0.3 protocols)
//! - Brute-force kernel search over a time window, optionally in parallel
//! - The unspent output record layout and read-only store access

pub mod compact;
pub mod error;
pub mod hash;
pub mod kernel;
pub mod network;
pub mod search;
pub mod store;
pub mod utxo;
pub mod weight;

pub use compact::{format_difficulty, from_difficulty, CompactTarget};
pub use error::{KernelError, StoreError};
pub use hash::double_sha256;
pub use kernel::{HashOrder, KernelCheck, KernelTemplate, KernelValidator};
pub use network::{KernelParams, Network};
pub use search::{search, CancelToken, KernelHit, KernelSearch, SearchOutcome, SearchWindow, TargetSpec};
#[cfg(feature = "parallel")]
pub use search::search_parallel;
pub use store::{KeyValueStore, MemoryStore, OutPointPage, UtxoIndex};
#[cfg(feature = "sled")]
pub use store::SledStore;
pub use utxo::{ChainTip, OutPoint, ScriptHash, UtxoRecord};
pub use weight::OverflowPolicy;
