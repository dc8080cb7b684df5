//! A known peer in the overlay, as held by the routing table.

use serde::{Deserialize, Serialize};

use crate::guid::Guid;

/// A contact known to the routing table: identity plus the information
/// needed to reach it through the (external) transport.
///
/// Equality is by `guid` only: two contacts with the same guid but
/// differing address/pubkey invalidate the older record rather than
/// comparing unequal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Contact {
    /// The contact's 160-bit identifier.
    pub guid: Guid,
    /// Transport URI (e.g. `quic://host:port`); the transport's concern to
    /// interpret.
    pub address: String,
    /// The contact's public key, opaque to the DHT core.
    pub public_key: Vec<u8>,
    /// Optional human-readable nickname.
    pub nickname: Option<String>,
}

impl Contact {
    /// Build a new contact.
    pub fn new(guid: Guid, address: impl Into<String>, public_key: Vec<u8>) -> Self {
        Self {
            guid,
            address: address.into(),
            public_key,
            nickname: None,
        }
    }

    /// Builder-style nickname attachment.
    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = Some(nickname.into());
        self
    }
}

impl PartialEq for Contact {
    fn eq(&self, other: &Self) -> bool {
        self.guid == other.guid
    }
}

impl Eq for Contact {}
