//! The maintenance scheduler: bucket refresh and the republish/expire/
//! replicate sweep over the local value store.
//!
//! This module only computes *what* to do (which keys to refresh,
//! republish, replicate, or delete); actually running an
//! `iterative_find`/`iterative_store` per item is `crate::dht::Dht`'s job,
//! run sequentially to cap outbound fan-out.

use std::time::Duration;

use crate::guid::Guid;
use crate::routing_table::RoutingTable;
use crate::value_store::LocalValueStore;

/// The outcome of scanning the local value store for republish/expire work.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepPlan {
    /// Owned keys past `T_expire`: re-store via `iterative_store`.
    pub republish: Vec<Guid>,
    /// Non-owned keys due for replication (`T_replicate` elapsed since last
    /// publish, not yet expired).
    pub replicate: Vec<Guid>,
    /// Non-owned keys past `T_expire`: drop from the local store.
    pub delete: Vec<Guid>,
}

/// One random key per stale bucket (or every bucket, if `force_refresh`),
/// to drive a sequential `iterativeFindNode` refresh pass. `t_refresh_secs`
/// is the caller's configured staleness threshold.
pub fn bucket_refresh_keys(routing_table: &RoutingTable, force_refresh: bool, t_refresh_secs: u64) -> Vec<Guid> {
    routing_table.get_refresh_list(0, force_refresh, Duration::from_secs(t_refresh_secs))
}

/// Scan the local value store and classify every key per the
/// republish/expire/replicate rule: owned keys past `t_expire_secs`
/// republish; non-owned keys past `t_expire_secs` are dropped; non-owned
/// keys unrefreshed for `t_replicate_secs` are replicated. Does not mutate
/// the store; the caller applies `delete` after any `republish`/`replicate`
/// dispatch completes. The reserved node-state bookkeeping key is never
/// scanned, even if something wrote an entry under it.
pub fn plan_sweep(
    store: &LocalValueStore,
    local_guid: &Guid,
    now: u64,
    t_expire_secs: u64,
    t_replicate_secs: u64,
) -> SweepPlan {
    let mut plan = SweepPlan::default();
    let node_state_key = crate::dht::node_state_key();

    for key in store.keys() {
        if key == node_state_key {
            continue;
        }
        let stored = store.get(&key).expect("key came from store.keys()");
        let age = now.saturating_sub(stored.originally_published_at);

        if stored.original_publisher_guid == *local_guid {
            if age >= t_expire_secs {
                plan.republish.push(key);
            }
        } else if age >= t_expire_secs {
            plan.delete.push(key);
        } else if now.saturating_sub(stored.last_published_at) >= t_replicate_secs {
            plan.replicate.push(key);
        }
    }

    plan
}
