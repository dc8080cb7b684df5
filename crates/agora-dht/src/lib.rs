//! # agora-dht
//!
//! Kademlia-style distributed hash table core for the Agora marketplace
//! overlay.
//!
//! This crate implements:
//! - A 160-bit XOR-metric routing table that splits the bucket covering the
//!   local GUID on demand (an `OptimizedTreeRoutingTable`), rather than a
//!   fixed bucket array.
//! - An iterative `findNode`/`findValue` lookup engine (alpha-parallel,
//!   shortlist convergence).
//! - A local value store with publish/replicate/expire lifecycles and
//!   notary/keyword index-merge semantics.
//! - A peer table of active transport peers, reconciled with the routing
//!   table.
//! - A maintenance scheduler for bucket refresh and the republish/expire
//!   sweep.
//!
//! The cryptographic transport, persistence backend, and wire encoding are
//! external collaborators, modeled here as the [`collab::Transport`] and
//! [`collab::KvStore`] traits.
//!
//! ## Key Parameters
//!
//! | Parameter | Value |
//! |---|---|
//! | k (bucket size) | 20 |
//! | alpha (lookup parallelism) | 3 |
//! | T_refresh (bucket staleness) | 1 hour |
//! | T_replicate (replication interval) | 1 hour |
//! | T_expire (republish/expire threshold) | 24 hours |
//! | GUID width | 160 bits |

pub mod collab;
pub mod config;
pub mod contact;
pub mod dht;
pub mod guid;
pub mod lookup;
pub mod maintenance;
pub mod peer_table;
pub mod protocol;
pub mod routing_table;
pub mod value_store;

/// Kademlia bucket width / replication factor.
pub const K: usize = 20;

/// Lookup parallelism factor.
pub const ALPHA: usize = 3;

/// Bucket staleness threshold, in seconds (1 hour).
pub const T_REFRESH_SECS: u64 = 3600;

/// Replication interval for non-owned values, in seconds (1 hour).
pub const T_REPLICATE_SECS: u64 = 3600;

/// Expiry threshold for replicas, in seconds (24 hours).
pub const T_EXPIRE_SECS: u64 = 86_400;

/// Internal bookkeeping key excluded from the republish/expire sweep.
pub const NODE_STATE_KEY: &str = "nodeState";

/// Errors produced by DHT operations.
#[derive(Debug, thiserror::Error)]
pub enum DhtError {
    /// `iterative_find(findNode, localGuid)` was called: a node cannot look
    /// itself up.
    #[error("cannot look up the local GUID")]
    LookingForYourself,

    /// A local-store `put` was attempted without an original publisher, and
    /// none could be inferred.
    #[error("original publisher is required and was not supplied")]
    PublisherMissing,

    /// The routing table has no contact for a GUID that a caller expected
    /// to be routable.
    #[error("no route to node {0}")]
    NoRoute(guid::Guid),

    /// A collaborator (transport, persistence) reported a failure.
    #[error("collaborator error: {0}")]
    Collaborator(String),

    /// Serialization of a stored value failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration failed to parse or validate.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Convenience result type for DHT operations.
pub type Result<T> = std::result::Result<T, DhtError>;
