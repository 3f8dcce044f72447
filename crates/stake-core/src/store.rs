//! Read access to an unspent output store.
//!
//! The kernel code only reads: point lookups by key and ordered prefix
//! scans. Any ordered key-value backend can sit behind [`KeyValueStore`].

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::StoreError;
use crate::utxo::{ChainTip, OutPoint, ScriptHash, UtxoRecord};

/// Key-value pair returned by a prefix scan.
pub type KvPair = (Vec<u8>, Vec<u8>);

/// Iterator over a prefix scan in key order.
pub type PrefixIter<'a> = Box<dyn Iterator<Item = Result<KvPair, StoreError>> + 'a>;

/// Ordered key-value storage.
pub trait KeyValueStore {
    /// Value stored under `key`, if any.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Entries whose keys start with `prefix`, in ascending key order.
    fn scan_prefix<'a>(&'a self, prefix: &[u8]) -> PrefixIter<'a>;
}

/// In-memory store backed by a `BTreeMap`.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    map: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.map.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl FromIterator<KvPair> for MemoryStore {
    fn from_iter<I: IntoIterator<Item = KvPair>>(iter: I) -> Self {
        MemoryStore {
            map: iter.into_iter().collect(),
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.map.get(key).cloned())
    }

    fn scan_prefix<'a>(&'a self, prefix: &[u8]) -> PrefixIter<'a> {
        let prefix = prefix.to_vec();
        Box::new(
            self.map
                .range(prefix.clone()..)
                .take_while(move |(k, _)| k.starts_with(&prefix))
                .map(|(k, v)| Ok((k.clone(), v.clone()))),
        )
    }
}

/// Store backed by a sled database.
#[cfg(feature = "sled")]
#[derive(Debug, Clone)]
pub struct SledStore {
    db: sled::Db,
}

#[cfg(feature = "sled")]
impl SledStore {
    /// Open (or create) a database directory.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let db = sled::open(path)?;
        tracing::info!(path = %path.display(), "opened unspent store");
        Ok(SledStore { db })
    }

    pub fn from_db(db: sled::Db) -> Self {
        SledStore { db }
    }

    pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.db.insert(key, value)?;
        Ok(())
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(feature = "sled")]
impl KeyValueStore for SledStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    fn scan_prefix<'a>(&'a self, prefix: &[u8]) -> PrefixIter<'a> {
        Box::new(self.db.scan_prefix(prefix).map(|entry| {
            entry
                .map(|(k, v)| (k.to_vec(), v.to_vec()))
                .map_err(StoreError::from)
        }))
    }
}

/// One page of an address's outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutPointPage {
    pub outpoints: Vec<OutPoint>,
    /// No further outputs exist past this page.
    pub complete: bool,
}

/// Typed reader over an unspent output store.
#[derive(Debug, Clone)]
pub struct UtxoIndex<S> {
    store: S,
}

impl<S: KeyValueStore> UtxoIndex<S> {
    pub fn new(store: S) -> Self {
        UtxoIndex { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Record for one output.
    pub fn fetch_utxo(&self, outpoint: &OutPoint) -> Result<UtxoRecord, StoreError> {
        let value = self
            .store
            .get(&outpoint.key())?
            .ok_or_else(|| StoreError::NotFound(format!("utxo {}", outpoint)))?;
        UtxoRecord::decode(&value)
    }

    /// Page through an address's outputs in key order.
    ///
    /// Skips the first `skip` entries and returns at most `count`
    /// (`count == 0` means no limit).
    pub fn fetch_outpoints(
        &self,
        script_hash: &ScriptHash,
        count: usize,
        skip: usize,
    ) -> Result<OutPointPage, StoreError> {
        let mut entries = self.store.scan_prefix(&script_hash.index_prefix());
        for _ in 0..skip {
            match entries.next() {
                Some(entry) => {
                    entry?;
                }
                None => break,
            }
        }
        let mut outpoints = Vec::new();

        while count == 0 || outpoints.len() < count {
            match entries.next() {
                Some(entry) => outpoints.push(OutPoint::from_key(&entry?.1)?),
                None => {
                    return Ok(OutPointPage {
                        outpoints,
                        complete: true,
                    })
                }
            }
        }

        let complete = match entries.next() {
            Some(entry) => {
                entry?;
                false
            }
            None => true,
        };
        debug!(%script_hash, returned = outpoints.len(), complete, "fetched outpoint page");
        Ok(OutPointPage {
            outpoints,
            complete,
        })
    }

    /// All outputs of an address together with their records.
    pub fn fetch_coins(
        &self,
        script_hash: &ScriptHash,
    ) -> Result<Vec<(OutPoint, UtxoRecord)>, StoreError> {
        let page = self.fetch_outpoints(script_hash, 0, 0)?;
        let coins = page
            .outpoints
            .into_iter()
            .map(|outpoint| Ok((outpoint, self.fetch_utxo(&outpoint)?)))
            .collect::<Result<Vec<_>, StoreError>>()?;
        debug!(%script_hash, coins = coins.len(), "fetched coins");
        Ok(coins)
    }

    /// Newest block reflected in the store.
    pub fn fetch_height(&self) -> Result<ChainTip, StoreError> {
        let value = self
            .store
            .get(&ChainTip::KEY)?
            .ok_or_else(|| StoreError::NotFound("height record".to_string()))?;
        ChainTip::decode(&value)
    }
}
