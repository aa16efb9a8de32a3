//! Request routing over discovery output.
//!
//! Clients pick a target per request from the regions discovery returns,
//! based on the requested consistency level and locality. Selection is
//! deterministic (same-DC first, then lowest node address) so retries and
//! tests behave predictably.

use std::hash::Hasher;
use twox_hash::XxHash64;

use crate::core::error::DkvError;
use crate::rpc::proto::{RegionInfo, RegionStatus};

/// Read consistency requested by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsistencyLevel {
    /// Served only by the shard's LEADER.
    Linearizable,
    /// Served by the DC-local PRIMARY_FOLLOWER, falling back to LEADER.
    Sequential,
    /// Served by any ACTIVE_SLAVE or SECONDARY_FOLLOWER, preferring the
    /// client's DC, falling back to any serving member.
    Eventual,
}

/// Map a key to its shard.
///
/// The hash is seeded with the database name so distinct databases spread
/// keys differently across the same vBucket count.
pub fn vbucket_for_key(database: &str, key: &[u8], vbucket_count: u32) -> u32 {
    debug_assert!(vbucket_count > 0);
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(database.as_bytes());
    hasher.write(key);
    (hasher.finish() % u64::from(vbucket_count)) as u32
}

/// Pick a read target for the given consistency level.
pub fn select_read_target(
    regions: &[RegionInfo],
    level: ConsistencyLevel,
    local_dc: &str,
) -> Option<RegionInfo> {
    match level {
        ConsistencyLevel::Linearizable => pick(regions, local_dc, &[RegionStatus::Leader]),
        ConsistencyLevel::Sequential => regions
            .iter()
            .filter(|r| r.status() == RegionStatus::PrimaryFollower && r.dc_id == local_dc)
            .min_by(|a, b| a.node_address.cmp(&b.node_address))
            .cloned()
            .or_else(|| pick(regions, local_dc, &[RegionStatus::Leader])),
        ConsistencyLevel::Eventual => pick(
            regions,
            local_dc,
            &[RegionStatus::ActiveSlave, RegionStatus::SecondaryFollower],
        ),
    }
}

/// Pick the write target: the LEADER, nothing else.
pub fn select_write_target(regions: &[RegionInfo]) -> Option<RegionInfo> {
    regions
        .iter()
        .filter(|r| r.status() == RegionStatus::Leader)
        .min_by(|a, b| a.node_address.cmp(&b.node_address))
        .cloned()
}

fn pick(regions: &[RegionInfo], local_dc: &str, allowed: &[RegionStatus]) -> Option<RegionInfo> {
    regions
        .iter()
        .filter(|r| allowed.contains(&r.status()))
        .min_by(|a, b| {
            let a_local = a.dc_id == local_dc;
            let b_local = b.dc_id == local_dc;
            b_local
                .cmp(&a_local)
                .then_with(|| a.node_address.cmp(&b.node_address))
        })
        .cloned()
}

/// Bounded retry policy for the write path: on NotLeader, refresh
/// discovery and try the hinted leader until attempts run out.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

impl RetryPolicy {
    /// Whether a failed attempt should be retried against a refreshed view.
    pub fn should_retry(&self, attempt: u32, error: &DkvError) -> bool {
        if attempt >= self.max_retries {
            return false;
        }
        matches!(
            error,
            DkvError::NotLeader { .. } | DkvError::Unreachable { .. }
        )
    }
}
