//! 160-bit node/value identifiers and the XOR distance metric.
//!
//! GUIDs and value keys share a single namespace, the standard Kademlia
//! design where distance is defined once for both.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Width, in bytes, of a GUID/key (160 bits).
pub const GUID_LEN: usize = 20;

/// A 160-bit node identifier or value key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Guid(#[serde(with = "guid_hex")] pub [u8; GUID_LEN]);

impl Guid {
    /// The all-zero GUID. Never a legitimate self-assigned identifier, but
    /// useful as a sentinel in tests and range bounds.
    pub const ZERO: Guid = Guid([0u8; GUID_LEN]);

    /// The all-one GUID: the upper bound of the key space.
    pub const MAX: Guid = Guid([0xFFu8; GUID_LEN]);

    /// Generate a cryptographically random GUID.
    ///
    /// Used both for self-assigning a node identity and for minting a
    /// `find_id` that scopes a single lookup: it must come from a
    /// cryptographically strong source to avoid cross-search aliasing.
    pub fn random() -> Self {
        let mut bytes = [0u8; GUID_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Guid(bytes)
    }

    /// XOR distance between two identifiers, as an unsigned integer metric.
    pub fn distance(&self, other: &Guid) -> Guid {
        let mut out = [0u8; GUID_LEN];
        for i in 0..GUID_LEN {
            out[i] = self.0[i] ^ other.0[i];
        }
        Guid(out)
    }

    /// Number of leading zero bits in this value, treated as a distance.
    ///
    /// Returns `None` for the zero distance (identical identifiers).
    pub fn leading_zero_bits(&self) -> Option<usize> {
        for (i, byte) in self.0.iter().enumerate() {
            if *byte != 0 {
                return Some(i * 8 + byte.leading_zeros() as usize);
            }
        }
        None
    }

    /// Generate a random GUID that falls within `[lower, upper]` inclusive.
    ///
    /// Used by the routing table's refresh-list generator to produce a
    /// random key inside a given bucket's range. Bucket ranges are always
    /// bit-prefix ranges (`lower` and `upper` share a common high-order
    /// prefix; `lower`'s remaining bits are zero and `upper`'s are one), so
    /// this copies the shared prefix and randomizes the rest, which is exact
    /// and O(1) rather than rejection sampling.
    pub fn random_in_range(lower: &Guid, upper: &Guid) -> Guid {
        debug_assert!(lower <= upper);
        let mut out = [0u8; GUID_LEN];
        let mut rng = rand::rngs::OsRng;
        rng.fill_bytes(&mut out);

        for i in 0..GUID_LEN {
            let free = lower.0[i] ^ upper.0[i];
            out[i] = (lower.0[i] & !free) | (out[i] & free);
        }
        Guid(out)
    }

    /// Render as lowercase hex, the wire/storage-key form used throughout
    /// (160-bit hex keys).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from lowercase or uppercase hex.
    pub fn from_hex(s: &str) -> Option<Guid> {
        let bytes = hex::decode(s).ok()?;
        if bytes.len() != GUID_LEN {
            return None;
        }
        let mut out = [0u8; GUID_LEN];
        out.copy_from_slice(&bytes);
        Some(Guid(out))
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", self.to_hex())
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

mod guid_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 20], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 20], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let decoded = hex::decode(&s).map_err(serde::de::Error::custom)?;
        decoded
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected a 20-byte hex GUID"))
    }
}
