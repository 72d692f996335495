//! Value Log Module
//!
//! Immutable, sorted on-disk segments holding flushed blob data, and the
//! manager that reads across them and compacts them.
//!
//! ## Segment File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (14 bytes)                                       │
//! │   Magic: "CSVL" (4) | Version: u16 (2) | Count: u64 (8) │
//! ├─────────────────────────────────────────────────────────┤
//! │ Data Block (variable)                                   │
//! │   [KeyLen: u32][ValLen: u32][Key][Value]                │
//! │   (ValLen = u32::MAX means tombstone, no value bytes)   │
//! ├─────────────────────────────────────────────────────────┤
//! │ Index Block (variable)                                  │
//! │   [KeyLen: u32][Offset: u64][Key]                       │
//! ├─────────────────────────────────────────────────────────┤
//! │ Footer (16 bytes)                                       │
//! │   IndexOffset: u64 (8) | DataCRC: u32 (4) | Padding (4) │
//! └─────────────────────────────────────────────────────────┘
//! ```

mod builder;
mod iterator;
mod manager;
mod reader;

use std::path::PathBuf;

pub use builder::SegmentBuilder;
pub use iterator::SegmentIterator;
pub use manager::SegmentManager;
pub use reader::SegmentReader;

/// Magic bytes identifying a chainstore value log segment
pub(crate) const MAGIC: &[u8; 4] = b"CSVL";

/// Current segment format version
pub(crate) const VERSION: u16 = 1;

/// Magic (4) + Version (2) + EntryCount (8)
pub(crate) const HEADER_SIZE: u64 = 14;

/// IndexOffset (8) + DataCRC (4) + Padding (4)
pub(crate) const FOOTER_SIZE: u64 = 16;

/// Per-entry prefix in the data block: KeyLen (4) + ValLen (4)
pub(crate) const ENTRY_PREFIX: u64 = 8;

/// Sentinel value length marking a tombstone
pub(crate) const TOMBSTONE_MARKER: u32 = u32::MAX;

/// Summary of a segment that was just written
#[derive(Debug, Clone)]
pub struct SegmentMeta {
    pub path: PathBuf,
    pub entry_count: u64,
    pub file_size: u64,
}
