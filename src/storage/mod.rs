//! Storage engine contract and backends.
//!
//! The engine capability set is split across three traits mirroring the
//! roles a store plays in the replication pipeline:
//!
//! - [`KvStore`] - keyed reads/writes, iteration, backup/restore
//! - [`ChangePropagator`] - the master half: a totally ordered stream of
//!   committed change records
//! - [`ChangeApplier`] - the slave half: idempotent, strictly contiguous
//!   replay of change records
//!
//! Two backends implement the full set: [`memory::MemStore`] and
//! [`durable::DurableStore`], selected at startup from configuration.

pub mod durable;
pub mod memory;
pub mod wal;

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::config::StorageConfig;
use crate::core::error::{DkvError, DkvResult};
use crate::core::time;
use crate::rpc::proto::{decode_trxns, ChangeRecord, TrxnRecord, TrxnType};

/// Byte-keyed store operations.
pub trait KvStore: Send + Sync {
    /// Atomic single-key write. `ttl_secs` of zero means no expiry.
    fn put(&self, key: &[u8], value: &[u8], ttl_secs: u64) -> DkvResult<()>;

    /// Atomic tombstone for a key. Deleting an absent key still commits a
    /// change record so slaves observe the same history.
    fn delete(&self, key: &[u8]) -> DkvResult<()>;

    /// Atomically commit a batch of transactions as one change record.
    /// Returns the change number assigned to the batch.
    fn write_batch(&self, batch: WriteBatch) -> DkvResult<u64>;

    /// Multi-get: one result per key in input order; missing or expired
    /// keys yield an empty value, never an error.
    fn get(&self, keys: &[&[u8]]) -> DkvResult<Vec<Vec<u8>>>;

    /// Snapshot-consistent ascending iteration from `start_key`. With a
    /// prefix, iteration halts at the first key not bearing it.
    fn iterate(&self, start_key: &[u8], key_prefix: Option<&[u8]>) -> DkvResult<EntryIter>;

    /// Write a self-contained point-in-time snapshot under `path`.
    fn backup(&self, path: &Path) -> DkvResult<()>;

    /// Replace the entire keyspace from a snapshot, adopting its change
    /// number.
    fn restore(&self, path: &Path) -> DkvResult<()>;
}

/// Master half of the replication pipeline.
pub trait ChangePropagator: Send + Sync {
    /// Change number of the last durably committed batch.
    fn latest_committed_change_number(&self) -> u64;

    /// All committed changes with change number >= `from`, up to `max`,
    /// ascending. `from == 0` starts at the earliest retained change.
    /// Fails with `ChangesUnavailable` below the retention floor.
    fn load_changes(&self, from: u64, max: usize) -> DkvResult<Vec<ChangeRecord>>;
}

/// Slave half of the replication pipeline.
pub trait ChangeApplier: Send + Sync {
    /// Apply records in order; each record replays atomically. Requires
    /// the first record to continue exactly where this store left off,
    /// otherwise fails with `NonContiguousChanges`. Returns the highest
    /// applied change number.
    fn save_changes(&self, records: &[ChangeRecord]) -> DkvResult<u64>;
}

/// The full engine capability set.
pub trait StorageEngine: KvStore + ChangePropagator + ChangeApplier {}

impl<T: KvStore + ChangePropagator + ChangeApplier> StorageEngine for T {}

/// Open the configured storage backend.
pub fn open_engine(config: &StorageConfig) -> anyhow::Result<Arc<dyn StorageEngine>> {
    match config.engine.as_str() {
        "memory" => Ok(Arc::new(memory::MemStore::new(config.retained_changes))),
        "durable" => {
            let store = durable::DurableStore::open(
                Path::new(&config.db_folder),
                config.retained_changes,
                config.create_db_folder_if_missing,
            )?;
            Ok(Arc::new(store))
        }
        other => anyhow::bail!("unknown storage engine: {}", other),
    }
}

/// A batch of transactions committed atomically as one change record.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    trxns: Vec<TrxnRecord>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a Put with no expiry.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> &mut Self {
        self.trxns
            .push(TrxnRecord::put(key.to_vec(), value.to_vec(), 0));
        self
    }

    /// Append a Put expiring `ttl_secs` from now.
    pub fn put_with_ttl(&mut self, key: &[u8], value: &[u8], ttl_secs: u64) -> &mut Self {
        self.trxns.push(TrxnRecord::put(
            key.to_vec(),
            value.to_vec(),
            time::expire_at_from_ttl(ttl_secs),
        ));
        self
    }

    /// Append a Delete.
    pub fn delete(&mut self, key: &[u8]) -> &mut Self {
        self.trxns.push(TrxnRecord::delete(key.to_vec()));
        self
    }

    pub fn len(&self) -> usize {
        self.trxns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trxns.is_empty()
    }

    fn into_trxns(self) -> Vec<TrxnRecord> {
        self.trxns
    }
}

/// Finite iterator over a snapshot of the keyspace taken at creation.
/// Not restartable; later writes are not observed.
pub struct EntryIter {
    entries: std::vec::IntoIter<(Vec<u8>, Vec<u8>)>,
}

impl EntryIter {
    fn new(entries: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        Self {
            entries: entries.into_iter(),
        }
    }
}

impl Iterator for EntryIter {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next()
    }
}

/// A stored value with its expiry deadline (epoch seconds, 0 = none).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct StoredEntry {
    pub value: Vec<u8>,
    pub expire_at: u64,
}

/// Snapshot file contents for backup/restore and the durable checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SnapshotFile {
    /// Change number of the source store at snapshot time.
    pub change_number: u64,
    /// Live (non-expired) entries.
    pub entries: Vec<(Vec<u8>, StoredEntry)>,
}

/// Bounded in-memory window of the most recent change records.
///
/// `floor` is the earliest change number still retained; when the window is
/// empty it points one past the latest committed number, so a fully
/// caught-up reader gets an empty result instead of an error.
pub(crate) struct ChangeWindow {
    records: VecDeque<ChangeRecord>,
    capacity: usize,
    floor: u64,
}

impl ChangeWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            floor: 1,
        }
    }

    /// Record a freshly committed change, evicting the oldest past capacity.
    pub fn push(&mut self, record: ChangeRecord) {
        self.records.push_back(record);
        while self.records.len() > self.capacity {
            self.records.pop_front();
        }
        if let Some(front) = self.records.front() {
            self.floor = front.change_number;
        }
    }

    /// Drop all retained history; the next available change is `latest + 1`.
    pub fn reset(&mut self, latest: u64) {
        self.records.clear();
        self.floor = latest + 1;
    }

    pub fn floor(&self) -> u64 {
        self.floor
    }

    pub fn load(&self, from: u64, max: usize) -> DkvResult<Vec<ChangeRecord>> {
        let from = if from == 0 { self.floor } else { from };
        if from < self.floor {
            return Err(DkvError::ChangesUnavailable {
                requested: from,
                floor: self.floor,
            });
        }
        Ok(self
            .records
            .iter()
            .skip_while(|r| r.change_number < from)
            .take(max)
            .cloned()
            .collect())
    }
}

/// Shared state-machine core behind both backends: the keyed index, the
/// monotonic change sequence, and the retained change window. Callers hold
/// the backend's write lock for mutations, so the sequence has one writer.
pub(crate) struct StoreCore {
    index: BTreeMap<Vec<u8>, StoredEntry>,
    window: ChangeWindow,
    latest_change_number: u64,
}

impl StoreCore {
    pub fn new(retained_changes: usize) -> Self {
        Self {
            index: BTreeMap::new(),
            window: ChangeWindow::new(retained_changes),
            latest_change_number: 0,
        }
    }

    pub fn latest_change_number(&self) -> u64 {
        self.latest_change_number
    }

    /// Package a transaction batch as the next change record. The record is
    /// not yet applied; the caller commits it via [`Self::apply_record`]
    /// after making it durable.
    pub fn stage_batch(&self, trxns: Vec<TrxnRecord>) -> ChangeRecord {
        ChangeRecord::new(self.latest_change_number + 1, trxns)
    }

    /// Apply a committed change record to the index and advance the
    /// sequence. All transactions land or the record is rejected untouched.
    pub fn apply_record(&mut self, record: &ChangeRecord) -> DkvResult<()> {
        // Replay the canonical serialised form when present; fall back to
        // the explicit transaction list for peers that omit it.
        let trxns = if record.serialised_form.is_empty() {
            record.trxns.clone()
        } else {
            decode_trxns(&record.serialised_form)
                .map_err(|e| DkvError::storage(format!("undecodable change record: {}", e)))?
        };

        // Validate the whole record before touching the index.
        for trxn in &trxns {
            match trxn.trxn_type() {
                Some(_) => {}
                None => {
                    return Err(DkvError::invalid(format!(
                        "unknown transaction type {} in change {}",
                        trxn.trxn_type, record.change_number
                    )))
                }
            }
            if trxn.key.is_empty() {
                return Err(DkvError::invalid(format!(
                    "empty key in change {}",
                    record.change_number
                )));
            }
        }

        for trxn in trxns {
            match trxn.trxn_type() {
                Some(TrxnType::Put) => {
                    self.index.insert(
                        trxn.key,
                        StoredEntry {
                            value: trxn.value,
                            expire_at: trxn.expire_at,
                        },
                    );
                }
                Some(TrxnType::Delete) => {
                    self.index.remove(&trxn.key);
                }
                None => unreachable!("validated above"),
            }
        }

        self.latest_change_number = record.change_number;
        self.window.push(record.clone());
        Ok(())
    }

    /// Verify a save_changes range starts exactly after this store's
    /// history and stays dense.
    pub fn check_contiguity(&self, records: &[ChangeRecord]) -> DkvResult<()> {
        let mut expected = self.latest_change_number + 1;
        for record in records {
            if record.change_number != expected {
                return Err(DkvError::NonContiguousChanges {
                    expected,
                    got: record.change_number,
                });
            }
            expected += 1;
        }
        Ok(())
    }

    pub fn load_changes(&self, from: u64, max: usize) -> DkvResult<Vec<ChangeRecord>> {
        self.window.load(from, max)
    }

    /// One value per key in input order; missing and expired keys yield
    /// empty values.
    pub fn multi_get(&self, keys: &[&[u8]]) -> Vec<Vec<u8>> {
        let now = time::now_epoch_secs();
        keys.iter()
            .map(|key| match self.index.get(*key) {
                Some(entry) if !time::is_expired(entry.expire_at, now) => entry.value.clone(),
                _ => Vec::new(),
            })
            .collect()
    }

    /// Collect the snapshot a new iterator walks.
    pub fn collect_range(
        &self,
        start_key: &[u8],
        key_prefix: Option<&[u8]>,
    ) -> Vec<(Vec<u8>, Vec<u8>)> {
        let now = time::now_epoch_secs();
        let mut entries = Vec::new();
        for (key, entry) in self.index.range(start_key.to_vec()..) {
            if let Some(prefix) = key_prefix {
                if !key.starts_with(prefix) {
                    break;
                }
            }
            if time::is_expired(entry.expire_at, now) {
                continue;
            }
            entries.push((key.clone(), entry.value.clone()));
        }
        entries
    }

    /// Live entries for a snapshot; expired entries are compacted away here.
    pub fn snapshot(&self) -> SnapshotFile {
        let now = time::now_epoch_secs();
        SnapshotFile {
            change_number: self.latest_change_number,
            entries: self
                .index
                .iter()
                .filter(|(_, entry)| !time::is_expired(entry.expire_at, now))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Replace the entire keyspace from a snapshot, adopting its change
    /// number. Retained history is dropped, so downstream readers below the
    /// new floor must bootstrap.
    pub fn install_snapshot(&mut self, snapshot: SnapshotFile) {
        self.index = snapshot.entries.into_iter().collect();
        self.latest_change_number = snapshot.change_number;
        self.window.reset(snapshot.change_number);
    }
}

/// Reject the invalid keys and limits shared by every backend entrypoint.
pub(crate) fn validate_key(key: &[u8]) -> DkvResult<()> {
    if key.is_empty() {
        return Err(DkvError::invalid("empty key"));
    }
    Ok(())
}

pub(crate) fn validate_batch(batch: &WriteBatch) -> DkvResult<Vec<TrxnRecord>> {
    if batch.is_empty() {
        return Err(DkvError::invalid("empty write batch"));
    }
    for trxn in &batch.trxns {
        validate_key(&trxn.key)?;
    }
    Ok(batch.clone().into_trxns())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(n: u64) -> ChangeRecord {
        ChangeRecord::new(n, vec![TrxnRecord::put(b"k".to_vec(), b"v".to_vec(), 0)])
    }

    #[test]
    fn window_evicts_and_tracks_floor() {
        let mut window = ChangeWindow::new(3);
        for n in 1..=5 {
            window.push(record(n));
        }
        assert_eq!(window.floor(), 3);

        let err = window.load(2, 10).unwrap_err();
        assert!(matches!(
            err,
            DkvError::ChangesUnavailable {
                requested: 2,
                floor: 3
            }
        ));

        let loaded = window.load(0, 10).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].change_number, 3);
    }

    #[test]
    fn window_caught_up_reader_gets_empty() {
        let mut window = ChangeWindow::new(8);
        window.push(record(1));
        window.push(record(2));
        assert!(window.load(3, 10).unwrap().is_empty());
    }

    #[test]
    fn window_reset_moves_floor_past_latest() {
        let mut window = ChangeWindow::new(8);
        window.push(record(1));
        window.reset(40);
        assert_eq!(window.floor(), 41);
        assert!(window.load(41, 10).unwrap().is_empty());
        assert!(window.load(40, 10).is_err());
    }

    #[test]
    fn core_rejects_gap_in_save_range() {
        let mut core = StoreCore::new(16);
        core.apply_record(&record(1)).unwrap();
        let err = core.check_contiguity(&[record(3)]).unwrap_err();
        assert!(matches!(
            err,
            DkvError::NonContiguousChanges {
                expected: 2,
                got: 3
            }
        ));
        core.check_contiguity(&[record(2), record(3)]).unwrap();
        let err = core.check_contiguity(&[record(2), record(4)]).unwrap_err();
        assert!(matches!(
            err,
            DkvError::NonContiguousChanges {
                expected: 3,
                got: 4
            }
        ));
    }
}
