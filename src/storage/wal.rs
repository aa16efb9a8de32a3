//! Segmented change-record write-ahead log.
//!
//! Every committed change record is appended here before it is applied to
//! the in-memory index, making the durable backend's history replayable on
//! restart. Records are bincode-encoded and length-prefixed; segments
//! rotate at a fixed size so restore can discard history in one sweep.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::rpc::proto::ChangeRecord;

/// Default maximum segment size (16 MB).
const DEFAULT_SEGMENT_MAX_SIZE: u64 = 16 * 1024 * 1024;

/// Append handle over a directory of WAL segments.
pub struct ChangeWal {
    dir: PathBuf,
    writer: Option<BufWriter<File>>,
    current_segment_id: u64,
    current_segment_size: u64,
    max_segment_size: u64,
}

impl ChangeWal {
    /// Open the WAL directory, resuming after the highest existing segment.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create WAL directory: {}", dir.display()))?;

        let next_segment_id = Self::segment_paths(dir)?
            .last()
            .and_then(|path| Self::segment_id_of(path))
            .map(|id| id + 1)
            .unwrap_or(0);

        Ok(Self {
            dir: dir.to_path_buf(),
            writer: None,
            current_segment_id: next_segment_id,
            current_segment_size: 0,
            max_segment_size: DEFAULT_SEGMENT_MAX_SIZE,
        })
    }

    /// Override the rotation threshold (tests use small segments).
    pub fn with_segment_size(mut self, max_size: u64) -> Self {
        self.max_segment_size = max_size;
        self
    }

    /// Append a change record and sync it to disk.
    ///
    /// The record is durable once this returns; the caller may then apply
    /// it to the index.
    pub fn append(&mut self, record: &ChangeRecord) -> Result<()> {
        let bytes = bincode::serialize(record).context("failed to serialize WAL record")?;

        self.ensure_open_segment()?;
        if let Some(ref mut writer) = self.writer {
            let len = bytes.len() as u32;
            writer
                .write_all(&len.to_le_bytes())
                .context("failed to write record length")?;
            writer
                .write_all(&bytes)
                .context("failed to write record data")?;
            writer.flush().context("failed to flush WAL segment")?;
            writer
                .get_ref()
                .sync_all()
                .context("failed to sync WAL segment")?;
        }

        self.current_segment_size += 4 + bytes.len() as u64;
        if self.current_segment_size >= self.max_segment_size {
            self.writer = None;
            self.current_segment_id += 1;
            self.current_segment_size = 0;
        }

        Ok(())
    }

    /// Read every record in segment order, in the order it was appended.
    pub fn read_all(dir: &Path) -> Result<Vec<ChangeRecord>> {
        let mut records = Vec::new();
        if !dir.exists() {
            return Ok(records);
        }
        for path in Self::segment_paths(dir)? {
            Self::read_segment(&path, &mut records)?;
        }
        Ok(records)
    }

    /// Delete all segments and start over. Used when a snapshot replaces
    /// the keyspace and retained history becomes meaningless.
    pub fn truncate(&mut self) -> Result<()> {
        self.writer = None;
        for path in Self::segment_paths(&self.dir)? {
            std::fs::remove_file(&path)
                .with_context(|| format!("failed to remove segment: {}", path.display()))?;
        }
        self.current_segment_id = 0;
        self.current_segment_size = 0;
        Ok(())
    }

    fn ensure_open_segment(&mut self) -> Result<()> {
        if self.writer.is_some() {
            return Ok(());
        }
        let path = self
            .dir
            .join(format!("segment_{:016}.wal", self.current_segment_id));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open segment: {}", path.display()))?;
        self.current_segment_size = file.metadata().map(|m| m.len()).unwrap_or(0);
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    fn read_segment(path: &Path, records: &mut Vec<ChangeRecord>) -> Result<()> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to open segment: {}", path.display()))
            }
        };

        let mut reader = BufReader::new(file);
        let mut len_buf = [0u8; 4];
        loop {
            match reader.read_exact(&mut len_buf) {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e).context("failed to read record length"),
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            let mut record_buf = vec![0u8; len];
            if reader.read_exact(&mut record_buf).is_err() {
                // Torn tail write from a crash; everything before it is intact.
                tracing::warn!(segment = %path.display(), "WAL segment ends in a torn record");
                break;
            }
            match bincode::deserialize::<ChangeRecord>(&record_buf) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(
                        segment = %path.display(),
                        error = %e,
                        "WAL replay stopped at undecodable record"
                    );
                    break;
                }
            }
        }
        Ok(())
    }

    fn segment_paths(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("failed to read WAL directory: {}", dir.display()))?
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "wal"))
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn segment_id_of(path: &Path) -> Option<u64> {
        path.file_stem()?
            .to_str()?
            .strip_prefix("segment_")?
            .parse()
            .ok()
    }
}
