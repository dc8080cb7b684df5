//! Overlay control messages. Wire encoding is the transport's concern;
//! these are the in-memory shapes the DHT core sends and receives.

use serde::{Deserialize, Serialize};

use crate::guid::Guid;
use crate::value_store::{IndexOp, Payload};

/// A `findNode` request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FindNodeMsg {
    pub sender_guid: Guid,
    pub sender_nick: Option<String>,
    pub uri: String,
    pub pubkey: Vec<u8>,
    pub key: Guid,
    pub find_value: bool,
    pub find_id: Guid,
}

/// A node tuple as returned in a `foundNode` reply.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeTuple {
    pub guid: Guid,
    pub address: String,
    pub pubkey: Vec<u8>,
}

/// A node tuple as returned in a `foundNodes` list (carries a nickname).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeQuad {
    pub guid: Guid,
    pub address: String,
    pub pubkey: Vec<u8>,
    pub nickname: Option<String>,
}

/// The payload of a `findNodeResponse`: exactly one of the three shapes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum FindResult {
    FoundKey(Payload),
    FoundNode(NodeTuple),
    FoundNodes(Vec<NodeQuad>),
}

/// A `findNodeResponse` message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FindNodeResponseMsg {
    pub sender_guid: Guid,
    pub sender_nick: Option<String>,
    pub uri: String,
    pub pubkey: Vec<u8>,
    pub find_id: Guid,
    pub result: FindResult,
}

/// A `store` message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreMsg {
    pub key: Guid,
    pub value: StoreValue,
    pub original_publisher_id: Guid,
    pub age: u64,
}

/// The value carried by a `store` message: either a full payload to write
/// (used by `iterative_store`'s first publish/republish/replicate), or an
/// index-merge mutation to apply in place.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum StoreValue {
    Put(Payload),
    NotaryIndexAdd(Guid),
    NotaryIndexRemove(Guid),
    KeywordIndexAdd(String),
    KeywordIndexRemove(String),
}

impl StoreValue {
    /// The index-merge operation this message carries, if any.
    pub fn as_index_op(&self) -> Option<IndexOp> {
        match self {
            StoreValue::NotaryIndexAdd(g) => Some(IndexOp::NotaryAdd(*g)),
            StoreValue::NotaryIndexRemove(g) => Some(IndexOp::NotaryRemove(*g)),
            StoreValue::KeywordIndexAdd(s) => Some(IndexOp::ListingAdd(s.clone())),
            StoreValue::KeywordIndexRemove(s) => Some(IndexOp::ListingRemove(s.clone())),
            StoreValue::Put(_) => None,
        }
    }
}

/// Any overlay control message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Message {
    FindNode(FindNodeMsg),
    FindNodeResponse(FindNodeResponseMsg),
    Store(StoreMsg),
}
