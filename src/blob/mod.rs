//! Blob Store Module
//!
//! Log-structured key-value store for large immutable payloads.
//!
//! ```text
//!          put / delete (batched by BlobTxn)
//!                     │
//!          ┌──────────▼──────────┐
//!          │         WAL         │  append + CRC, replayed on open
//!          └──────────┬──────────┘
//!          ┌──────────▼──────────┐
//!          │      MemTable       │  BTreeMap under RwLock
//!          └──────────┬──────────┘
//!                     │ flush when full
//!          ┌──────────▼──────────┐
//!          │  Value log segments │  newest → oldest, rewritten by GC
//!          └─────────────────────┘
//! ```
//!
//! The pure-memory mode keeps only the memtable.

mod metrics;
mod store;
mod txn;

pub mod memtable;
pub mod vlog;
pub mod wal;

pub use metrics::BlobMetrics;
pub use store::{BlobStats, BlobStore};
pub use txn::BlobTxn;

/// Blob key holding the last commit timestamp (i64, big-endian millis)
pub const COMMIT_TIMESTAMP_KEY: &[u8] = b"metadata_commit_timestamp";

/// A stored version of a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// A live value
    Value(Vec<u8>),

    /// A deletion marker
    Tombstone,
}

impl Record {
    /// Value bytes carried by this record
    pub fn len(&self) -> usize {
        match self {
            Record::Value(v) => v.len(),
            Record::Tombstone => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_value(self) -> Option<Vec<u8>> {
        match self {
            Record::Value(v) => Some(v),
            Record::Tombstone => None,
        }
    }
}

/// Result of one value log GC pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcOutcome {
    /// A segment was rewritten or removed; another pass may find more
    Rewrote { segment_id: u64, reclaimed_bytes: u64 },

    /// No segment reached the discard ratio
    NothingToReclaim,
}
