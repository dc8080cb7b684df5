//! The peer table: active transport peers, plus the durable known-nodes
//! bootstrap log.
//!
//! This module holds the plain data structures; the `upsert` reconciliation
//! orchestration touches the routing table, the transport, and persistence,
//! so it lives on [`crate::dht::Dht`] and calls down into the simple
//! primitives here.

use crate::contact::Contact;
use crate::guid::Guid;

/// The set of contacts with which a transport session has been (or is
/// being) established.
#[derive(Default)]
pub struct PeerTable {
    entries: Vec<Contact>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Exact 4-tuple match: address, public key, guid, and nickname must all
    /// agree.
    pub fn find_exact(
        &self,
        address: &str,
        public_key: &[u8],
        guid: &Guid,
        nickname: Option<&str>,
    ) -> Option<&Contact> {
        self.entries.iter().find(|c| {
            c.address == address
                && c.public_key == public_key
                && c.guid == *guid
                && c.nickname.as_deref() == nickname
        })
    }

    /// Index of an entry sharing `guid` or `address` with the given values,
    /// if any (the fallback match that lets an address or key rotation
    /// still reconcile onto the existing entry).
    pub fn position_by_guid_or_address(&self, guid: &Guid, address: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|c| c.guid == *guid || c.address == address)
    }

    pub fn get(&self, idx: usize) -> Option<&Contact> {
        self.entries.get(idx)
    }

    pub fn get_by_guid(&self, guid: &Guid) -> Option<&Contact> {
        self.entries.iter().find(|c| c.guid == *guid)
    }

    /// Overwrite the fields of the entry at `idx`, keeping its table slot.
    pub fn overwrite(&mut self, idx: usize, contact: Contact) {
        self.entries[idx] = contact;
    }

    /// Remove by transport address; returns the removed contact.
    pub fn remove(&mut self, address: &str) -> Option<Contact> {
        let pos = self.entries.iter().position(|c| c.address == address)?;
        Some(self.entries.remove(pos))
    }

    /// Insert a brand-new active peer (no existing match by guid or
    /// address).
    pub fn push(&mut self, contact: Contact) {
        self.entries.push(contact);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Contact> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Contact> {
        self.entries.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sort by ascending XOR distance to `target`, as required at the top
    /// of each lookup iteration.
    pub fn sort_by_distance(&mut self, target: &Guid) {
        self.entries
            .sort_by(|a, b| a.guid.distance(target).cmp(&b.guid.distance(target)));
    }
}

/// A deduplicated log of nodes learned across the node's lifetime, used as
/// the bootstrap seed for future startups.
#[derive(Default)]
pub struct KnownNodesList {
    entries: Vec<Contact>,
}

impl KnownNodesList {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Record a node, deduplicating by GUID (later records replace earlier
    /// ones with the same GUID).
    pub fn record(&mut self, contact: Contact) {
        if let Some(pos) = self.entries.iter().position(|c| c.guid == contact.guid) {
            self.entries[pos] = contact;
        } else {
            self.entries.push(contact);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Contact> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
