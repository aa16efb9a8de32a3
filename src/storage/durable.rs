//! Durable storage backend.
//!
//! Layout under the configured `db_folder`:
//!
//! ```text
//! db_folder/
//!   checkpoint.snap     - keyspace snapshot written on restore
//!   wal/segment_*.wal   - change records committed after the checkpoint
//! ```
//!
//! Every write batch is appended to the WAL and synced before it is applied
//! to the in-memory index, so a restart replays exactly the committed
//! history. The WAL lives inside the write lock: one writer, totally
//! ordered change numbers.

use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};

use super::memory::{read_snapshot, write_snapshot};
use super::wal::ChangeWal;
use super::{
    validate_batch, validate_key, ChangeApplier, ChangePropagator, EntryIter, KvStore, StoreCore,
    WriteBatch,
};
use crate::core::error::{DkvError, DkvResult};
use crate::rpc::proto::{ChangeRecord, TrxnRecord};

const CHECKPOINT_FILE: &str = "checkpoint.snap";
const WAL_DIR: &str = "wal";

/// WAL-backed store owning its on-disk directory exclusively.
pub struct DurableStore {
    core: RwLock<StoreCore>,
    wal: Mutex<ChangeWal>,
    checkpoint_path: PathBuf,
}

impl DurableStore {
    /// Open (or create) the store under `db_folder`, replaying the
    /// checkpoint and any WAL records committed after it.
    pub fn open(
        db_folder: &Path,
        retained_changes: usize,
        create_if_missing: bool,
    ) -> anyhow::Result<Self> {
        use anyhow::Context;

        if !db_folder.exists() {
            if !create_if_missing {
                anyhow::bail!("db folder does not exist: {}", db_folder.display());
            }
            std::fs::create_dir_all(db_folder)
                .with_context(|| format!("failed to create db folder: {}", db_folder.display()))?;
        }

        let checkpoint_path = db_folder.join(CHECKPOINT_FILE);
        let wal_dir = db_folder.join(WAL_DIR);

        let mut core = StoreCore::new(retained_changes);
        if checkpoint_path.exists() {
            let snapshot = read_snapshot(&checkpoint_path)
                .map_err(|e| anyhow::anyhow!("failed to load checkpoint: {}", e))?;
            core.install_snapshot(snapshot);
        }

        let mut replayed = 0usize;
        for record in ChangeWal::read_all(&wal_dir)? {
            // Records at or below the checkpoint were folded into it.
            if record.change_number <= core.latest_change_number() {
                continue;
            }
            core.apply_record(&record)
                .map_err(|e| anyhow::anyhow!("WAL replay failed: {}", e))?;
            replayed += 1;
        }

        let wal = ChangeWal::open(&wal_dir)?;
        tracing::info!(
            db_folder = %db_folder.display(),
            latest_change = core.latest_change_number(),
            replayed_records = replayed,
            "durable store opened"
        );

        Ok(Self {
            core: RwLock::new(core),
            wal: Mutex::new(wal),
            checkpoint_path,
        })
    }

    /// Make a record durable, then apply it. Called under no lock; takes
    /// the write lock for the whole commit so readers never observe a
    /// half-applied batch.
    fn commit(&self, trxns: Vec<TrxnRecord>) -> DkvResult<u64> {
        let mut core = self.core.write();
        let record = core.stage_batch(trxns);
        self.wal
            .lock()
            .append(&record)
            .map_err(|e| DkvError::storage(format!("WAL append failed: {}", e)))?;
        core.apply_record(&record)?;
        Ok(record.change_number)
    }
}

impl KvStore for DurableStore {
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

        // Persist the restored state as the new checkpoint before touching
        // the live index, so a crash mid-restore recovers to the snapshot.
        write_snapshot(&snapshot, &self.checkpoint_path)?;

        let mut core = self.core.write();
        self.wal
            .lock()
            .truncate()
            .map_err(|e| DkvError::storage(format!("WAL truncate failed: {}", e)))?;
        core.install_snapshot(snapshot);
        tracing::info!(
            latest_change = core.latest_change_number(),
            "keyspace restored from snapshot"
        );
        Ok(())
    }
}

impl ChangePropagator for DurableStore {
    fn latest_committed_change_number(&self) -> u64 {
        self.core.read().latest_change_number()
    }

    fn load_changes(&self, from: u64, max: usize) -> DkvResult<Vec<ChangeRecord>> {
        self.core.read().load_changes(from, max)
    }
}

impl ChangeApplier for DurableStore {
    fn save_changes(&self, records: &[ChangeRecord]) -> DkvResult<u64> {
        if records.is_empty() {
            return Err(DkvError::invalid("empty change range"));
        }
        let mut core = self.core.write();
        core.check_contiguity(records)?;
        for record in records {
            self.wal
                .lock()
                .append(record)
                .map_err(|e| DkvError::storage(format!("WAL append failed: {}", e)))?;
            core.apply_record(record)?;
        }
        Ok(core.latest_change_number())
    }
}
