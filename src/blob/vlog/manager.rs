//! Segment Manager
//!
//! Manages the value log segments and coordinates reads, flushes and GC.
//!
//! ## Responsibilities
//! - Discover existing segments on startup
//! - Search segments newest → oldest for reads
//! - Create new segments from MemTable flushes
//! - Rewrite segments whose space is mostly stale (value log GC)

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::blob::memtable::MemTable;
use crate::blob::{GcOutcome, Record};
use crate::error::{Result, StoreError};

use super::{SegmentBuilder, SegmentReader};

/// Manages the value log
///
/// ## Concurrency:
/// - `segments`: RwLock over shared readers; lookups take the read lock
/// - `gc_lock`: at most one GC pass at a time
/// - A GC rewrite keeps the segment id and replaces the reader in place, so
///   newest → oldest order survives concurrent flushes and restarts.
pub struct SegmentManager {
    dir: PathBuf,

    /// Open readers, ordered newest → oldest
    segments: RwLock<Vec<Arc<SegmentReader>>>,

    next_segment_id: AtomicU64,

    gc_lock: Mutex<()>,
}

/// A segment picked for rewriting
struct Candidate {
    position: usize,
    stale_bytes: u64,
    total_bytes: u64,
}

impl SegmentManager {
    /// Open or create the value log in `dir`
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let mut ids: Vec<u64> = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) == Some("tmp") {
                // Leftover from an interrupted GC rewrite
                tracing::debug!(path = %path.display(), "blob: removing stale GC output");
                fs::remove_file(&path)?;
                continue;
            }
            if let Some(id) = Self::parse_segment_id(&path) {
                ids.push(id);
            }
        }
        ids.sort_unstable_by(|a, b| b.cmp(a));

        let mut segments = Vec::with_capacity(ids.len());
        for id in &ids {
            let reader = SegmentReader::open(*id, &Self::segment_path_with_dir(dir, *id))?;
            segments.push(Arc::new(reader));
        }
        let next_id = ids.first().map(|&id| id + 1).unwrap_or(1);

        Ok(Self {
            dir: dir.to_path_buf(),
            segments: RwLock::new(segments),
            next_segment_id: AtomicU64::new(next_id),
            gc_lock: Mutex::new(()),
        })
    }

    /// Newest version of `key` across all segments
    pub fn get(&self, key: &[u8]) -> Result<Option<Record>> {
        let segments = self.segments.read();
        for segment in segments.iter() {
            if let Some(record) = segment.get(key)? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// Write a MemTable snapshot to a new, newest segment
    pub fn flush(&self, memtable: &MemTable) -> Result<u64> {
        let entries = memtable.snapshot();
        if entries.is_empty() {
            return Err(StoreError::Storage(
                "cannot flush an empty memtable".to_string(),
            ));
        }

        let id = self.next_segment_id.fetch_add(1, Ordering::SeqCst);
        let path = self.segment_path(id);
        let mut builder = SegmentBuilder::new(&path)?;
        for (key, record) in &entries {
            builder.add(key, record)?;
        }
        let meta = builder.finish()?;
        let reader = SegmentReader::open(id, &path)?;

        self.segments.write().insert(0, Arc::new(reader));
        tracing::debug!(
            segment = id,
            entries = meta.entry_count,
            bytes = meta.file_size,
            "blob: flushed memtable"
        );
        Ok(id)
    }

    /// One value log GC pass
    ///
    /// Rewrites the segment with the largest share of stale bytes, provided
    /// that share is at least `discard_ratio`. An entry is stale when the
    /// memtable or a newer segment holds the same key, or when it is a
    /// tombstone in the oldest segment (nothing older left to hide).
    pub fn collect_garbage(&self, discard_ratio: f64, memtable: &MemTable) -> Result<GcOutcome> {
        let _gc = self.gc_lock.lock();
        let snapshot: Vec<Arc<SegmentReader>> = self.segments.read().clone();

        let candidate = match Self::pick_candidate(&snapshot, discard_ratio, memtable) {
            Some(c) => c,
            None => return Ok(GcOutcome::NothingToReclaim),
        };
        let victim = Arc::clone(&snapshot[candidate.position]);
        let newer = &snapshot[..candidate.position];
        let oldest = candidate.position + 1 == snapshot.len();

        let mut live: Vec<(Vec<u8>, Record)> = Vec::new();
        victim.for_each_entry(|key, record| {
            if !Self::is_stale(&key, &record, newer, oldest, memtable) {
                live.push((key, record));
            }
            Ok(())
        })?;

        let old_size = victim.file_size();
        let new_size = if live.is_empty() {
            let mut segments = self.segments.write();
            segments.retain(|s| s.id() != victim.id());
            drop(segments);
            fs::remove_file(victim.path())?;
            0
        } else {
            let tmp_path = victim.path().with_extension("tmp");
            let mut builder = SegmentBuilder::new(&tmp_path)?;
            for (key, record) in &live {
                builder.add(key, record)?;
            }
            let meta = builder.finish()?;
            fs::rename(&tmp_path, victim.path())?;
            Self::sync_dir(&self.dir)?;

            let replacement = Arc::new(SegmentReader::open(victim.id(), victim.path())?);
            let mut segments = self.segments.write();
            if let Some(slot) = segments.iter_mut().find(|s| s.id() == victim.id()) {
                *slot = replacement;
            }
            meta.file_size
        };

        tracing::debug!(
            segment = victim.id(),
            stale_bytes = candidate.stale_bytes,
            total_bytes = candidate.total_bytes,
            live_entries = live.len(),
            "blob: value log segment rewritten"
        );
        Ok(GcOutcome::Rewrote {
            segment_id: victim.id(),
            reclaimed_bytes: old_size.saturating_sub(new_size),
        })
    }

    fn pick_candidate(
        snapshot: &[Arc<SegmentReader>],
        discard_ratio: f64,
        memtable: &MemTable,
    ) -> Option<Candidate> {
        let mut best: Option<(f64, Candidate)> = None;
        for (position, segment) in snapshot.iter().enumerate() {
            let newer = &snapshot[..position];
            let oldest = position + 1 == snapshot.len();
            let total_bytes = segment.data_size();
            if total_bytes == 0 {
                continue;
            }

            let mut stale_bytes = 0;
            for (key, size) in segment.entry_sizes() {
                let shadowed = memtable.contains_key(key) || newer.iter().any(|s| s.contains_key(key));
                // Tombstones are detected by size: prefix + key only
                let tombstone = oldest
                    && size == super::ENTRY_PREFIX + key.len() as u64
                    && matches!(segment.get(key), Ok(Some(Record::Tombstone)));
                if shadowed || tombstone {
                    stale_bytes += size;
                }
            }

            let ratio = stale_bytes as f64 / total_bytes as f64;
            if ratio >= discard_ratio && stale_bytes > 0 {
                let better = best.as_ref().map(|(r, _)| ratio > *r).unwrap_or(true);
                if better {
                    best = Some((
                        ratio,
                        Candidate {
                            position,
                            stale_bytes,
                            total_bytes,
                        },
                    ));
                }
            }
        }
        best.map(|(_, c)| c)
    }

    fn is_stale(
        key: &[u8],
        record: &Record,
        newer: &[Arc<SegmentReader>],
        oldest: bool,
        memtable: &MemTable,
    ) -> bool {
        if memtable.contains_key(key) || newer.iter().any(|s| s.contains_key(key)) {
            return true;
        }
        oldest && matches!(record, Record::Tombstone)
    }

    /// Number of segments
    pub fn segment_count(&self) -> usize {
        self.segments.read().len()
    }

    /// Total bytes on disk across all segments
    pub fn total_bytes(&self) -> u64 {
        self.segments.read().iter().map(|s| s.file_size()).sum()
    }

    /// Segment ids, newest first
    pub fn segment_ids(&self) -> Vec<u64> {
        self.segments.read().iter().map(|s| s.id()).collect()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn next_segment_id(&self) -> u64 {
        self.next_segment_id.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn segment_path(&self, id: u64) -> PathBuf {
        Self::segment_path_with_dir(&self.dir, id)
    }

    fn segment_path_with_dir(dir: &Path, id: u64) -> PathBuf {
        dir.join(format!("segment_{:06}.vlog", id))
    }

    /// "segment_000042.vlog" → Some(42)
    fn parse_segment_id(path: &Path) -> Option<u64> {
        if path.extension()?.to_str()? != "vlog" {
            return None;
        }
        let name = path.file_stem()?.to_string_lossy();
        name.strip_prefix("segment_")?.parse().ok()
    }

    #[cfg(unix)]
    fn sync_dir(dir: &Path) -> Result<()> {
        fs::File::open(dir)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_dir(_dir: &Path) -> Result<()> {
        Ok(())
    }
}
