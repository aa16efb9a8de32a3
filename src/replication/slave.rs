//! Slave half of the replication pipeline.
//!
//! One [`SlaveLoop`] task runs per (shard, slave). Each iteration pulls the
//! next contiguous range of changes from the currently chosen master,
//! applies it, persists the high-water mark, and derives the slave's region
//! status from the observed lag. Delivery is at-least-once; idempotence
//! comes from the strict-contiguity check on apply.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::watch;

use crate::core::config::ReplicationConfig;
use crate::core::error::{DkvError, DkvResult};
use crate::rpc::proto::{ChangeRecord, RegionStatus};
use crate::storage::{ChangeApplier, ChangePropagator, KvStore, StorageEngine};

/// A pulled range of changes plus the master's current latest number.
#[derive(Debug, Clone, Default)]
pub struct ChangeBatch {
    pub master_change_number: u64,
    pub changes: Vec<ChangeRecord>,
}

/// Where a slave pulls changes from.
///
/// The RPC implementation re-resolves the shard's LEADER through discovery
/// on every call, so a master switchover is picked up on the next pull
/// without any callback plumbing.
#[tonic::async_trait]
pub trait ChangeSource: Send + Sync {
    /// Fetch up to `max` changes starting at `from`.
    async fn get_changes(&self, from: u64, max: u32) -> DkvResult<ChangeBatch>;

    /// Ask the master to write a snapshot under `path` for bootstrap.
    async fn request_snapshot(&self, path: &Path) -> DkvResult<()>;
}

/// Shared view of a slave's progress, read by the heartbeat loop.
pub struct SlaveProgress {
    status: RwLock<RegionStatus>,
    applied: AtomicU64,
    master: AtomicU64,
    master_host: RwLock<String>,
}

impl SlaveProgress {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(RegionStatus::Inactive),
            applied: AtomicU64::new(0),
            master: AtomicU64::new(0),
            master_host: RwLock::new(String::new()),
        }
    }

    /// Address of the currently chosen master, for heartbeat reporting.
    pub fn master_host(&self) -> String {
        self.master_host.read().clone()
    }

    /// Record the master this slave currently tails.
    pub fn set_master_host(&self, host: &str) {
        *self.master_host.write() = host.to_string();
    }

    pub fn region_status(&self) -> RegionStatus {
        *self.status.read()
    }

    pub fn applied_change_number(&self) -> u64 {
        self.applied.load(Ordering::Acquire)
    }

    pub fn master_change_number(&self) -> u64 {
        self.master.load(Ordering::Acquire)
    }

    /// Master-minus-applied gap as last observed.
    pub fn lag(&self) -> u64 {
        self.master_change_number()
            .saturating_sub(self.applied_change_number())
    }

    fn record(&self, applied: u64, master: u64, status: RegionStatus) {
        self.applied.store(applied, Ordering::Release);
        self.master.store(master, Ordering::Release);
        *self.status.write() = status;
    }

    fn demote(&self) {
        *self.status.write() = RegionStatus::Inactive;
    }
}

impl Default for SlaveProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Persistent high-water mark, colocated with the KV store and synced
/// before the puller acknowledges progress.
pub struct AppliedStateFile {
    path: PathBuf,
}

impl AppliedStateFile {
    pub fn new(db_folder: &Path) -> Self {
        Self {
            path: db_folder.join("applied_change_number"),
        }
    }

    /// Load the persisted mark; zero when no state exists yet.
    pub fn load(&self) -> DkvResult<u64> {
        match std::fs::read(&self.path) {
            Ok(bytes) if bytes.len() == 8 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&bytes);
                Ok(u64::from_le_bytes(buf))
            }
            Ok(_) => Err(DkvError::storage(format!(
                "corrupt applied-state file: {}",
                self.path.display()
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist the mark with an fsync before returning.
    pub fn store(&self, applied: u64) -> DkvResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(&self.path)?;
        file.write_all(&applied.to_le_bytes())?;
        file.sync_all()?;
        Ok(())
    }
}

/// The single-threaded puller loop for one shard.
pub struct SlaveLoop {
    store: Arc<dyn StorageEngine>,
    source: Arc<dyn ChangeSource>,
    progress: Arc<SlaveProgress>,
    state_file: AppliedStateFile,
    config: ReplicationConfig,
    applied: u64,
    last_master_contact: Instant,
    backoff: Duration,
}

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

impl SlaveLoop {
    /// Build a puller, recovering the high-water mark from disk. A state
    /// file behind the local store (crash between apply and persist) is
    /// reconciled towards the store, which is the source of truth.
    pub fn new(
        store: Arc<dyn StorageEngine>,
        source: Arc<dyn ChangeSource>,
        progress: Arc<SlaveProgress>,
        db_folder: &Path,
        config: ReplicationConfig,
    ) -> DkvResult<Self> {
        let state_file = AppliedStateFile::new(db_folder);
        let persisted = state_file.load()?;
        let in_store = store.latest_committed_change_number();
        let applied = persisted.max(in_store);
        if persisted != in_store {
            tracing::info!(
                persisted,
                in_store,
                "reconciled applied change number with local store"
            );
            state_file.store(applied)?;
        }
        progress.record(applied, applied, RegionStatus::Inactive);

        Ok(Self {
            store,
            source,
            progress,
            state_file,
            config,
            applied,
            last_master_contact: Instant::now(),
            backoff: INITIAL_BACKOFF,
        })
    }

    /// The applied change number the next pull continues from.
    pub fn applied_change_number(&self) -> u64 {
        self.applied
    }

    /// Run until the shutdown signal flips. Errors inside an iteration are
    /// logged and retried; only unrecoverable storage corruption stops the
    /// loop.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            applied = self.applied,
            poll_interval_ms = self.config.poll_interval_ms,
            "slave puller started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            let delay = match self.pull_once().await {
                Ok(caught_up) => {
                    self.backoff = INITIAL_BACKOFF;
                    if caught_up {
                        Duration::from_millis(self.config.poll_interval_ms)
                    } else {
                        // Behind: pull again immediately.
                        Duration::ZERO
                    }
                }
                Err(e) if e.is_retriable() => {
                    self.handle_pull_error(&e);
                    let delay = self.backoff;
                    self.backoff = (self.backoff * 2).min(MAX_BACKOFF);
                    delay
                }
                Err(e) => {
                    tracing::error!(error = %e, "slave puller stopping on unrecoverable error");
                    self.progress.demote();
                    break;
                }
            };

            if delay.is_zero() {
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {}
            }
        }
        tracing::info!(applied = self.applied, "slave puller stopped");
    }

    /// One pull/apply/report iteration. Returns whether the slave is fully
    /// caught up with the master.
    pub async fn pull_once(&mut self) -> DkvResult<bool> {
        let batch = match self
            .source
            .get_changes(self.applied + 1, self.config.max_changes_per_pull)
            .await
        {
            Ok(batch) => batch,
            Err(DkvError::ChangesUnavailable { requested, floor }) => {
                tracing::warn!(requested, floor, "change log truncated past our position");
                self.bootstrap().await?;
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        self.last_master_contact = Instant::now();

        if !batch.changes.is_empty() {
            match self.store.save_changes(&batch.changes) {
                Ok(applied) => {
                    self.state_file.store(applied)?;
                    self.applied = applied;
                }
                Err(DkvError::NonContiguousChanges { expected, got }) => {
                    // Duplicate delivery of a range the store already holds;
                    // skip ahead to the store's own high-water mark.
                    let in_store = self.store.latest_committed_change_number();
                    tracing::warn!(
                        expected,
                        got,
                        in_store,
                        "skipping already-applied change range"
                    );
                    self.state_file.store(in_store)?;
                    self.applied = in_store;
                }
                Err(e) => return Err(e),
            }
        }

        let lag = batch.master_change_number.saturating_sub(self.applied);
        let status = if lag <= self.config.lag_bound {
            RegionStatus::ActiveSlave
        } else {
            RegionStatus::Inactive
        };
        self.progress
            .record(self.applied, batch.master_change_number, status);
        Ok(lag == 0)
    }

    /// Bootstrap from a master snapshot after the change log moved past us.
    async fn bootstrap(&mut self) -> DkvResult<()> {
        let Some(ref path) = self.config.bootstrap_path else {
            tracing::warn!("no bootstrap path configured; staying inactive until operator restore");
            self.progress.demote();
            return Ok(());
        };
        let path = PathBuf::from(path);
        tracing::info!(path = %path.display(), "bootstrapping from master snapshot");
        self.source.request_snapshot(&path).await?;
        self.store.restore(&path)?;
        let applied = self.store.latest_committed_change_number();
        self.state_file.store(applied)?;
        self.applied = applied;
        self.progress
            .record(applied, applied, RegionStatus::Inactive);
        Ok(())
    }

    fn handle_pull_error(&mut self, e: &DkvError) {
        let unreachable_for = self.last_master_contact.elapsed();
        tracing::warn!(
            error = %e,
            unreachable_secs = unreachable_for.as_secs(),
            "pull failed; backing off"
        );
        if unreachable_for.as_secs() > self.config.master_unreachable_secs {
            self.progress.demote();
        }
    }
}
