//! Blob store engine
//!
//! Coordinates the WAL, the memtable and the value log.
//!
//! ## Responsibilities
//! - Replay the WAL on open and make the replayed data durable
//! - Apply write batches atomically (one WAL entry per batch)
//! - Flush the memtable into a new value log segment when it fills up
//! - Run value log GC passes on request

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::blob::memtable::MemTable;
use crate::blob::vlog::SegmentManager;
use crate::blob::wal::{Operation, WalRecovery, WalWriter};
use crate::blob::{BlobMetrics, BlobTxn, GcOutcome, Record};
use crate::config::BlobConfig;
use crate::error::{Backend, Result, StoreError};

/// Point-in-time sizes of the blob store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlobStats {
    pub memtable_bytes: usize,
    pub memtable_entries: usize,
    pub segment_count: usize,
    pub vlog_bytes: u64,
}

/// Files backing a persistent store
struct Disk {
    dir: PathBuf,
    wal: Mutex<WalWriter>,
    segments: SegmentManager,
}

/// The blob store
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader
///
/// - **Writes** (apply/flush): serialized by `write_lock`, then
///   WAL → memtable → segments
/// - **Reads** (get): no write lock; memtable and segment manager use
///   internal RwLocks
/// - **GC**: serialized inside the segment manager; runs alongside writes
pub struct BlobStore {
    config: BlobConfig,

    /// `None` in pure-memory mode
    disk: Option<Disk>,

    memtable: MemTable,

    write_lock: Mutex<()>,

    closed: AtomicBool,

    metrics: BlobMetrics,
}

impl BlobStore {
    const WAL_FILENAME: &'static str = "wal.log";
    const VLOG_DIR: &'static str = "vlog";

    /// Open or create a blob store
    ///
    /// On a persistent open:
    /// 1. Load existing value log segments
    /// 2. Replay the WAL into the memtable
    /// 3. Flush replayed data to a segment and truncate the WAL
    pub fn open(config: BlobConfig) -> Result<Self> {
        let metrics = BlobMetrics::new()?;
        let memtable = MemTable::new();

        let disk = match &config.dir {
            None => None,
            Some(dir) => Some(Self::open_disk(dir, &config, &memtable)?),
        };

        let store = Self {
            config,
            disk,
            memtable,
            write_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
            metrics,
        };
        store.refresh_gauges();
        Ok(store)
    }

    fn open_disk(dir: &Path, config: &BlobConfig, memtable: &MemTable) -> Result<Disk> {
        fs::create_dir_all(dir)?;
        let wal_path = dir.join(Self::WAL_FILENAME);
        let segments = SegmentManager::open(&dir.join(Self::VLOG_DIR))?;

        let mut next_lsn = 1;
        if wal_path.exists() {
            let (entries, recovery) = WalRecovery::recover(&wal_path)?;
            if recovery.entries_recovered > 0 || recovery.entries_corrupted > 0 {
                tracing::info!(
                    recovered = recovery.entries_recovered,
                    corrupted = recovery.entries_corrupted,
                    last_lsn = recovery.last_lsn,
                    "blob: WAL recovery"
                );
            }
            for entry in entries {
                memtable.apply(entry.operations);
            }
            next_lsn = recovery.last_lsn + 1;
        }

        let mut wal = WalWriter::open(&wal_path, config.wal_sync_strategy, next_lsn)?;
        if !memtable.is_empty() {
            tracing::debug!(
                entries = memtable.entry_count(),
                "blob: flushing recovered entries"
            );
            segments.flush(memtable)?;
            memtable.clear();
            wal.truncate()?;
        }

        Ok(Disk {
            dir: dir.to_path_buf(),
            wal: Mutex::new(wal),
            segments,
        })
    }

    /// Latest value for `key`; `None` when absent or deleted
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        self.metrics.reads.inc();
        self.lookup(key)
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.apply(vec![Operation::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        }])
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.apply(vec![Operation::Delete { key: key.to_vec() }])
    }

    /// Apply a batch of writes atomically
    ///
    /// The batch is a single WAL entry, so after a crash either all of it
    /// or none of it is replayed.
    pub fn apply(&self, operations: Vec<Operation>) -> Result<()> {
        self.apply_batch(operations, false).map(|_| ())
    }

    /// Apply a batch and return the batch that restores the previous values
    ///
    /// Keys that were absent come back as deletes. The prior values are read
    /// under the write lock, so no other batch lands in between.
    pub(crate) fn apply_with_undo(&self, operations: Vec<Operation>) -> Result<Vec<Operation>> {
        self.apply_batch(operations, true)
    }

    fn apply_batch(&self, operations: Vec<Operation>, capture_undo: bool) -> Result<Vec<Operation>> {
        self.ensure_open()?;
        if operations.is_empty() {
            return Ok(Vec::new());
        }
        let _write_guard = self.write_lock.lock();

        let undo = if capture_undo {
            operations
                .iter()
                .map(|op| {
                    let key = op.key().to_vec();
                    Ok(match self.lookup(&key)? {
                        Some(value) => Operation::Put { key, value },
                        None => Operation::Delete { key },
                    })
                })
                .collect::<Result<Vec<_>>>()?
        } else {
            Vec::new()
        };

        let count = operations.len() as u64;
        let bytes: u64 = operations
            .iter()
            .map(|op| match op {
                Operation::Put { key, value } => (key.len() + value.len()) as u64,
                Operation::Delete { key } => key.len() as u64,
            })
            .sum();

        if let Some(disk) = &self.disk {
            disk.wal.lock().append(operations.clone())?;
        }
        let new_size = self.memtable.apply(operations);

        self.metrics.writes.inc_by(count);
        self.metrics.bytes_written.inc_by(bytes);
        self.metrics.memtable_bytes.set(new_size as i64);

        // The batch is already durable in the WAL; a failed flush is retried
        // on the next write instead of failing this one
        if self.disk.is_some() && new_size >= self.config.memtable_size_limit {
            if let Err(e) = self.flush_internal() {
                tracing::warn!(error = %e, memtable_bytes = new_size, "blob: flush after write failed");
            }
        }
        Ok(undo)
    }

    /// Current value without touching the read metrics
    fn lookup(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(record) = self.memtable.get(key) {
            return Ok(record.into_value());
        }
        match &self.disk {
            Some(disk) => Ok(disk.segments.get(key)?.and_then(Record::into_value)),
            None => Ok(None),
        }
    }

    /// Force the memtable out to a value log segment
    pub fn flush(&self) -> Result<()> {
        self.ensure_open()?;
        let _write_guard = self.write_lock.lock();
        self.flush_internal()
    }

    /// Called with the write lock held
    fn flush_internal(&self) -> Result<()> {
        let disk = match &self.disk {
            Some(disk) => disk,
            None => return Ok(()),
        };
        if self.memtable.is_empty() {
            return Ok(());
        }

        disk.segments.flush(&self.memtable)?;
        self.memtable.clear();
        disk.wal.lock().truncate()?;

        self.metrics.flushes.inc();
        self.refresh_gauges();
        Ok(())
    }

    /// Start a transaction over this store
    pub fn begin(&self, read_write: bool) -> BlobTxn<'_> {
        BlobTxn::new(self, read_write)
    }

    /// One value log GC pass
    ///
    /// Pure-memory stores have no value log and reject the call.
    pub fn run_value_log_gc(&self, discard_ratio: f64) -> Result<GcOutcome> {
        self.ensure_open()?;
        let disk = self.disk.as_ref().ok_or_else(|| {
            StoreError::Storage("value log GC is not available in memory mode".to_string())
        })?;

        self.metrics.gc_runs.inc();
        let outcome = disk
            .segments
            .collect_garbage(discard_ratio, &self.memtable)?;
        if let GcOutcome::Rewrote {
            reclaimed_bytes, ..
        } = outcome
        {
            self.metrics.gc_reclaimed_bytes.inc_by(reclaimed_bytes);
            self.refresh_gauges();
        }
        Ok(outcome)
    }

    /// Flush pending data and sync the WAL
    ///
    /// Safe to call more than once; later calls do nothing.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _write_guard = self.write_lock.lock();
        if let Some(disk) = &self.disk {
            self.flush_internal()?;
            disk.wal.lock().sync()?;
        }
        tracing::debug!("blob: store closed");
        Ok(())
    }

    pub fn stats(&self) -> BlobStats {
        let (segment_count, vlog_bytes) = match &self.disk {
            Some(disk) => (disk.segments.segment_count(), disk.segments.total_bytes()),
            None => (0, 0),
        };
        BlobStats {
            memtable_bytes: self.memtable.size(),
            memtable_entries: self.memtable.entry_count(),
            segment_count,
            vlog_bytes,
        }
    }

    pub fn metrics(&self) -> &BlobMetrics {
        &self.metrics
    }

    pub fn is_in_memory(&self) -> bool {
        self.disk.is_none()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Directory holding the WAL and value log, if persistent
    pub fn dir(&self) -> Option<&Path> {
        self.disk.as_ref().map(|d| d.dir.as_path())
    }

    /// Value log segment ids, newest first
    pub fn segment_ids(&self) -> Vec<u64> {
        self.disk
            .as_ref()
            .map(|d| d.segments.segment_ids())
            .unwrap_or_default()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(StoreError::Closed(Backend::Blob));
        }
        Ok(())
    }

    fn refresh_gauges(&self) {
        let stats = self.stats();
        self.metrics.memtable_bytes.set(stats.memtable_bytes as i64);
        self.metrics.segments.set(stats.segment_count as i64);
        self.metrics.vlog_bytes.set(stats.vlog_bytes as i64);
    }
}
