//! The local value store: keyed by 160-bit key, with publish/replicate/expire
//! metadata and notary/keyword index-merge semantics.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::guid::Guid;
use crate::{DhtError, Result};

/// A stored payload. Opaque values are stored as-is; the two index shapes
/// are mutated in place by index-merge store operations rather than
/// overwritten (a tagged variant in place of runtime type flipping).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// An arbitrary byte blob.
    Opaque(Vec<u8>),
    /// A notary index: the set of notary GUIDs backing this key.
    NotarySet(BTreeSet<Guid>),
    /// A keyword/listing index: the set of listing identifiers.
    ListingSet(BTreeSet<String>),
}

/// An index-merge mutation carried by an inbound `store` message.
#[derive(Clone, Debug)]
pub enum IndexOp {
    NotaryAdd(Guid),
    NotaryRemove(Guid),
    ListingAdd(String),
    ListingRemove(String),
}

impl Payload {
    /// Apply an index-merge mutation to this payload, creating the
    /// appropriate set shape if the payload was previously absent/opaque.
    ///
    /// Additions and removals do not commute; last-writer-wins per element.
    fn apply(existing: Option<Payload>, op: &IndexOp) -> Payload {
        match op {
            IndexOp::NotaryAdd(v) => {
                let mut set = match existing {
                    Some(Payload::NotarySet(s)) => s,
                    _ => BTreeSet::new(),
                };
                set.insert(*v);
                Payload::NotarySet(set)
            }
            IndexOp::NotaryRemove(v) => {
                let mut set = match existing {
                    Some(Payload::NotarySet(s)) => s,
                    _ => BTreeSet::new(),
                };
                set.remove(v);
                Payload::NotarySet(set)
            }
            IndexOp::ListingAdd(v) => {
                let mut set = match existing {
                    Some(Payload::ListingSet(s)) => s,
                    _ => BTreeSet::new(),
                };
                set.insert(v.clone());
                Payload::ListingSet(set)
            }
            IndexOp::ListingRemove(v) => {
                let mut set = match existing {
                    Some(Payload::ListingSet(s)) => s,
                    _ => BTreeSet::new(),
                };
                set.remove(v);
                Payload::ListingSet(set)
            }
        }
    }
}

/// Metadata tracked alongside every stored value.
#[derive(Clone, Debug)]
pub struct StoredValue {
    pub key: Guid,
    pub payload: Payload,
    pub original_publisher_guid: Guid,
    pub originally_published_at: u64,
    pub last_published_at: u64,
    pub market_id: Option<String>,
}

/// The local value store.
///
/// Internal bookkeeping keys (see [`crate::NODE_STATE_KEY`]) are ordinary
/// entries here; the republish/expire sweep is responsible for filtering
/// them out.
#[derive(Default)]
pub struct LocalValueStore {
    entries: HashMap<Guid, StoredValue>,
}

impl LocalValueStore {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Store a value directly, overwriting any previous entry at `key`.
    ///
    /// Used for ordinary (non-index-merge) `put`s: first publication of an
    /// opaque value, or a full overwrite by the owning node.
    pub fn put(
        &mut self,
        key: Guid,
        payload: Payload,
        now: u64,
        originally_published_at: u64,
        original_publisher_guid: Guid,
        market_id: Option<String>,
    ) {
        self.entries.insert(
            key,
            StoredValue {
                key,
                payload,
                original_publisher_guid,
                originally_published_at,
                last_published_at: now,
                market_id,
            },
        );
    }

    /// Apply an inbound `store` carrying an index-merge op. A remove against
    /// a key with no existing entry drops silently and creates nothing:
    /// there is no set to remove from.
    pub fn apply_index_op(
        &mut self,
        key: Guid,
        op: IndexOp,
        now: u64,
        original_publisher_guid: Option<Guid>,
        market_id: Option<String>,
    ) -> Result<()> {
        let existing = self.entries.remove(&key);

        if existing.is_none() && matches!(op, IndexOp::NotaryRemove(_) | IndexOp::ListingRemove(_)) {
            return Ok(());
        }

        let originally_published_at = existing
            .as_ref()
            .map(|v| v.originally_published_at)
            .unwrap_or(now);
        let publisher = match existing.as_ref().map(|v| v.original_publisher_guid) {
            Some(g) => g,
            None => original_publisher_guid.ok_or(DhtError::PublisherMissing)?,
        };
        let merged = Payload::apply(existing.map(|v| v.payload), &op);

        self.entries.insert(
            key,
            StoredValue {
                key,
                payload: merged,
                original_publisher_guid: publisher,
                originally_published_at,
                last_published_at: now,
                market_id,
            },
        );
        Ok(())
    }

    pub fn get(&self, key: &Guid) -> Option<&StoredValue> {
        self.entries.get(key)
    }

    pub fn del(&mut self, key: &Guid) -> Option<StoredValue> {
        self.entries.remove(key)
    }

    pub fn keys(&self) -> Vec<Guid> {
        self.entries.keys().copied().collect()
    }

    pub fn original_publisher(&self, key: &Guid) -> Option<Guid> {
        self.entries.get(key).map(|v| v.original_publisher_guid)
    }

    pub fn originally_published_at(&self, key: &Guid) -> Option<u64> {
        self.entries.get(key).map(|v| v.originally_published_at)
    }

    pub fn last_published_at(&self, key: &Guid) -> Option<u64> {
        self.entries.get(key).map(|v| v.last_published_at)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
