//! Traits for the external collaborators the DHT core depends on but does
//! not implement: the cryptographic transport and the persistence backend.
//!
//! Grounded on `ochra-dht::bootstrap::BootstrapTransport`'s
//! return-position-impl-trait shape, which lets an async trait method be
//! called from the DHT's single-owner event loop without boxing futures.

use std::future::Future;

use crate::contact::Contact;
use crate::guid::Guid;

/// Outcome of a port probe/handshake attempt against a freshly-created
/// crypto peer, during `PeerTable` upsert.
#[derive(Debug)]
pub enum HandshakeOutcome {
    /// The peer is reachable and the handshake completed.
    Established,
    /// The port probe or handshake failed; the peer may be retried later
    /// via normal discovery.
    Failed,
}

/// The cryptographic transport: framing, handshake, and encryption are its
/// concern, not the DHT's. The DHT only ever calls `send`,
/// `get_or_create_peer`, and `save_known_peer`.
pub trait Transport {
    /// Send a wire message to `contact`. Idempotent with respect to message
    /// contents; delivery is not guaranteed.
    fn send(
        &self,
        contact: &Contact,
        message: crate::protocol::Message,
    ) -> impl Future<Output = Result<(), String>> + Send;

    /// Obtain (creating if necessary) a crypto peer for the given address,
    /// and attempt a port probe followed by a handshake. Used by
    /// `PeerTable::upsert`'s "new peer" path.
    fn get_or_create_peer(
        &self,
        address: &str,
        public_key: &[u8],
    ) -> impl Future<Output = HandshakeOutcome> + Send;

    /// Persist a peer tuple to durable storage outside the DHT's own value
    /// store (e.g. an address book).
    fn save_peer_to_db(
        &self,
        contact: &Contact,
    ) -> impl Future<Output = Result<(), String>> + Send;
}

/// The narrow key-value persistence interface the DHT core needs: map-like
/// access keyed by 160-bit hex keys, with per-key metadata accessors.
pub trait KvStore {
    /// Store the encoded value bytes for `key`.
    fn put(&mut self, key: &Guid, value: &[u8]) -> Result<(), String>;

    /// Retrieve the encoded value bytes for `key`, if present.
    fn get(&self, key: &Guid) -> Result<Option<Vec<u8>>, String>;

    /// Delete any value stored for `key`.
    fn del(&mut self, key: &Guid) -> Result<(), String>;

    /// All keys currently stored.
    fn keys(&self) -> Result<Vec<Guid>, String>;
}
