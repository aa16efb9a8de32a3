//! In-memory storage backend.
//!
//! Same state machine as the durable backend minus the WAL: useful for
//! tests, ephemeral caches, and discovery-only nodes. Backup and restore
//! still work against snapshot files, so an in-memory slave can bootstrap
//! from a durable master.

use parking_lot::RwLock;
use std::path::Path;

use super::{
    validate_batch, validate_key, ChangeApplier, ChangePropagator, EntryIter, KvStore,
    SnapshotFile, StoreCore, WriteBatch,
};
use crate::core::error::{DkvError, DkvResult};
use crate::rpc::proto::{ChangeRecord, TrxnRecord};

/// In-memory store. Writes serialize through the write lock; reads run
/// concurrently against a consistent view.
pub struct MemStore {
    core: RwLock<StoreCore>,
}

impl MemStore {
    pub fn new(retained_changes: usize) -> Self {
        Self {
            core: RwLock::new(StoreCore::new(retained_changes)),
        }
    }

    fn commit(&self, trxns: Vec<TrxnRecord>) -> DkvResult<u64> {
        let mut core = self.core.write();
        let record = core.stage_batch(trxns);
        core.apply_record(&record)?;
        Ok(record.change_number)
    }
}

impl KvStore for MemStore {
    fn put(&self, key: &[u8], value: &[u8], ttl_secs: u64) -> DkvResult<()> {
        validate_key(key)?;
        let mut batch = WriteBatch::new();
        batch.put_with_ttl(key, value, ttl_secs);
        self.write_batch(batch).map(|_| ())
    }

    fn delete(&self, key: &[u8]) -> DkvResult<()> {
        validate_key(key)?;
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write_batch(batch).map(|_| ())
    }

    fn write_batch(&self, batch: WriteBatch) -> DkvResult<u64> {
        let trxns = validate_batch(&batch)?;
        self.commit(trxns)
    }

    fn get(&self, keys: &[&[u8]]) -> DkvResult<Vec<Vec<u8>>> {
        for key in keys {
            validate_key(key)?;
        }
        Ok(self.core.read().multi_get(keys))
    }

    fn iterate(&self, start_key: &[u8], key_prefix: Option<&[u8]>) -> DkvResult<EntryIter> {
        Ok(EntryIter::new(
            self.core.read().collect_range(start_key, key_prefix),
        ))
    }

    fn backup(&self, path: &Path) -> DkvResult<()> {
        let snapshot = self.core.read().snapshot();
        write_snapshot(&snapshot, path)
    }

    fn restore(&self, path: &Path) -> DkvResult<()> {
        let snapshot = read_snapshot(path)?;
        self.core.write().install_snapshot(snapshot);
        Ok(())
    }
}

impl ChangePropagator for MemStore {
    fn latest_committed_change_number(&self) -> u64 {
        self.core.read().latest_change_number()
    }

    fn load_changes(&self, from: u64, max: usize) -> DkvResult<Vec<ChangeRecord>> {
        self.core.read().load_changes(from, max)
    }
}

impl ChangeApplier for MemStore {
    fn save_changes(&self, records: &[ChangeRecord]) -> DkvResult<u64> {
        if records.is_empty() {
            return Err(DkvError::invalid("empty change range"));
        }
        let mut core = self.core.write();
        core.check_contiguity(records)?;
        for record in records {
            core.apply_record(record)?;
        }
        Ok(core.latest_change_number())
    }
}

/// Serialize a snapshot to a file, creating parent directories.
pub(crate) fn write_snapshot(snapshot: &SnapshotFile, path: &Path) -> DkvResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let bytes = bincode::serialize(snapshot)
        .map_err(|e| DkvError::storage(format!("failed to serialize snapshot: {}", e)))?;
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Read a snapshot back from a file.
pub(crate) fn read_snapshot(path: &Path) -> DkvResult<SnapshotFile> {
    let bytes = std::fs::read(path)?;
    bincode::deserialize(&bytes)
        .map_err(|e| DkvError::storage(format!("failed to decode snapshot: {}", e)))
}
