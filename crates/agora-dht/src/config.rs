//! DHT tuning configuration, loaded from TOML.
//!
//! Modeled on `ochra-daemon::config::DaemonConfig`'s typed-field,
//! `#[serde(default = "...")]` style, narrowed to the DHT's own tunables:
//! `k`, `alpha`, `T_refresh`, `T_replicate`, `T_expire`, plus a bootstrap
//! seed list.

use serde::{Deserialize, Serialize};

use crate::{DhtError, Result, ALPHA, K, T_EXPIRE_SECS, T_REFRESH_SECS, T_REPLICATE_SECS};

/// Tuning parameters for a `Dht` instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhtConfig {
    /// Bucket width / replication factor.
    #[serde(default = "default_k")]
    pub k: usize,
    /// Lookup parallelism.
    #[serde(default = "default_alpha")]
    pub alpha: usize,
    /// Bucket staleness threshold, in seconds.
    #[serde(default = "default_t_refresh")]
    pub t_refresh_secs: u64,
    /// Replication interval for non-owned values, in seconds.
    #[serde(default = "default_t_replicate")]
    pub t_replicate_secs: u64,
    /// Expiry threshold for owned/replica values, in seconds.
    #[serde(default = "default_t_expire")]
    pub t_expire_secs: u64,
    /// Bootstrap seed node addresses, tried in order on first join.
    #[serde(default)]
    pub bootstrap_seeds: Vec<String>,
}

fn default_k() -> usize {
    K
}

fn default_alpha() -> usize {
    ALPHA
}

fn default_t_refresh() -> u64 {
    T_REFRESH_SECS
}

fn default_t_replicate() -> u64 {
    T_REPLICATE_SECS
}

fn default_t_expire() -> u64 {
    T_EXPIRE_SECS
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            alpha: default_alpha(),
            t_refresh_secs: default_t_refresh(),
            t_replicate_secs: default_t_replicate(),
            t_expire_secs: default_t_expire(),
            bootstrap_seeds: Vec::new(),
        }
    }
}

impl DhtConfig {
    /// Parse configuration from a TOML document. Missing fields fall back
    /// to the conventional Kademlia defaults.
    pub fn from_toml(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| DhtError::Config(e.to_string()))
    }

    /// Serialize back to TOML, for config files written out by a host
    /// application.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| DhtError::Config(e.to_string()))
    }
}
