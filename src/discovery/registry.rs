//! Central registry of region heartbeats.
//!
//! The registry is a soft-state cache: nodes own their status and supply
//! new versions via UpdateStatus; the registry only stores, filters, and
//! expires them. Stale reads are expected; clients verify against the
//! target node on the actual request path.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::core::error::{DkvError, DkvResult};
use crate::rpc::proto::RegionInfo;

/// Identity of one node's presence in a region.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegionKey {
    pub dc_id: String,
    pub database: String,
    pub vbucket: u32,
    pub node_address: String,
}

impl RegionKey {
    fn of(info: &RegionInfo) -> Self {
        Self {
            dc_id: info.dc_id.clone(),
            database: info.database.clone(),
            vbucket: info.vbucket,
            node_address: info.node_address.clone(),
        }
    }
}

struct RegionEntry {
    info: RegionInfo,
    /// Reporter-supplied timestamp; enforces per-region monotonicity.
    heartbeat_ts: u64,
    /// Local receive time; drives expiry independent of reporter clocks.
    received_at: Instant,
}

/// Filter for GetClusterInfo; `None`/empty fields are wildcards and the
/// provided fields combine with AND semantics.
#[derive(Debug, Clone, Default)]
pub struct RegionFilter {
    pub dc_id: Option<String>,
    pub database: Option<String>,
    pub vbucket: Option<u32>,
}

impl RegionFilter {
    fn matches(&self, info: &RegionInfo) -> bool {
        self.dc_id.as_ref().is_none_or(|dc| *dc == info.dc_id)
            && self
                .database
                .as_ref()
                .is_none_or(|db| *db == info.database)
            && self.vbucket.is_none_or(|vb| vb == info.vbucket)
    }
}

/// The discovery region table.
pub struct DiscoveryRegistry {
    regions: RwLock<HashMap<RegionKey, RegionEntry>>,
    ttl: Duration,
}

impl DiscoveryRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            regions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Upsert a heartbeat. Timestamps must be monotonic per region key;
    /// older updates are dropped (the RPC layer reports OK for them; a
    /// reordered heartbeat is not the caller's problem).
    pub fn update_status(&self, info: RegionInfo, timestamp: u64) -> DkvResult<()> {
        if info.node_address.is_empty() || info.database.is_empty() {
            return Err(DkvError::invalid(
                "region heartbeat requires node_address and database",
            ));
        }
        let key = RegionKey::of(&info);
        let mut regions = self.regions.write();
        if let Some(entry) = regions.get(&key) {
            if timestamp < entry.heartbeat_ts {
                return Err(DkvError::StaleUpdate {
                    incoming: timestamp,
                    stored: entry.heartbeat_ts,
                });
            }
        }
        regions.insert(
            key,
            RegionEntry {
                info,
                heartbeat_ts: timestamp,
                received_at: Instant::now(),
            },
        );
        Ok(())
    }

    /// All live regions matching the filter, ordered by node address for
    /// stable output. Expired entries are omitted and lazily purged.
    pub fn cluster_info(&self, filter: &RegionFilter) -> Vec<RegionInfo> {
        let now = Instant::now();
        let mut result = Vec::new();
        let mut expired = Vec::new();
        {
            let regions = self.regions.read();
            for (key, entry) in regions.iter() {
                if now.duration_since(entry.received_at) > self.ttl {
                    expired.push(key.clone());
                    continue;
                }
                if filter.matches(&entry.info) {
                    result.push(entry.info.clone());
                }
            }
        }
        if !expired.is_empty() {
            let mut regions = self.regions.write();
            for key in expired {
                // Re-check under the write lock; a fresh heartbeat may
                // have raced the purge.
                if let Some(entry) = regions.get(&key) {
                    if now.duration_since(entry.received_at) > self.ttl {
                        regions.remove(&key);
                    }
                }
            }
        }
        result.sort_by(|a, b| a.node_address.cmp(&b.node_address));
        result
    }

    /// Number of tracked regions, including not-yet-purged expired ones.
    pub fn len(&self) -> usize {
        self.regions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.read().is_empty()
    }
}
