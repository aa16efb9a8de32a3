//! Master half of the replication pipeline.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::error::{DkvError, DkvResult};
use crate::core::time;
use crate::rpc::proto::Replica;
use crate::storage::ChangePropagator;

use super::slave::ChangeBatch;

/// Registry of asynchronous slaves attached to this master, keyed by
/// (zone, hostname, port). Updates are idempotent, so lost-update races on
/// concurrent heartbeats are benign: last writer wins on the timestamp.
#[derive(Default)]
pub struct ReplicaRegistry {
    replicas: RwLock<HashMap<Replica, u64>>,
}

impl ReplicaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a replica. Re-adding refreshes the last-seen timestamp.
    pub fn add(&self, replica: Replica) -> DkvResult<()> {
        if replica.hostname.is_empty() || replica.port == 0 {
            return Err(DkvError::invalid("replica requires hostname and port"));
        }
        let now = time::now_epoch_millis();
        self.replicas.write().insert(replica, now);
        Ok(())
    }

    /// Remove a replica. A no-op if it was never registered.
    pub fn remove(&self, replica: &Replica) {
        self.replicas.write().remove(replica);
    }

    /// Enumerate replicas, optionally filtered to one zone, ordered by
    /// address for stable output.
    pub fn list(&self, zone: Option<&str>) -> Vec<Replica> {
        let mut replicas: Vec<Replica> = self
            .replicas
            .read()
            .keys()
            .filter(|r| zone.is_none_or(|z| r.zone == z))
            .cloned()
            .collect();
        replicas.sort_by(|a, b| (&a.zone, &a.hostname, a.port).cmp(&(&b.zone, &b.hostname, b.port)));
        replicas
    }

    /// Last-seen timestamp for a replica, if registered.
    pub fn last_seen(&self, replica: &Replica) -> Option<u64> {
        self.replicas.read().get(replica).copied()
    }
}

/// Serves the ordered change stream out of the storage engine.
pub struct ChangeFeed {
    store: Arc<dyn ChangePropagator>,
}

impl ChangeFeed {
    pub fn new(store: Arc<dyn ChangePropagator>) -> Self {
        Self { store }
    }

    /// A bounded prefix of committed changes at or after `from`, together
    /// with this master's latest change number so callers can compute lag.
    ///
    /// `max == 0` is the metadata-only probe: just the latest number.
    pub fn get_changes(&self, from: u64, max: u32) -> DkvResult<ChangeBatch> {
        let master_change_number = self.store.latest_committed_change_number();
        if max == 0 {
            return Ok(ChangeBatch {
                master_change_number,
                changes: Vec::new(),
            });
        }
        let changes = self.store.load_changes(from, max as usize)?;
        Ok(ChangeBatch {
            master_change_number,
            changes,
        })
    }
}
