//! MemTable Module
//!
//! In-memory table for recent blob writes.
//!
//! ## Data Structure Choice
//! BTreeMap behind a `parking_lot::RwLock`:
//! - Ordered keys (required for segment generation)
//! - Many concurrent readers, one writer at a time

mod table;

pub use table::MemTable;
