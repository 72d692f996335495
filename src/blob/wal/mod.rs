//! Write-Ahead Log (WAL) Module
//!
//! Durability for the blob store: every committed batch is appended here
//! before it reaches the memtable.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Entry 1                                 │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ LSN (8) │ CRC (4) │Len (4) │ Data   │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! ├─────────────────────────────────────────┤
//! │ Entry 2                                 │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ LSN (8) │ CRC (4) │Len (4) │ Data   │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! └─────────────────────────────────────────┘
//! ```
//! `Data` is the bincode encoding of the batch's operations and timestamp.

mod entry;
mod reader;
mod recovery;
mod writer;

pub use entry::{Decoded, Operation, WalEntry, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use reader::{ReadOutcome, WalReader};
pub use recovery::{RecoveryResult, WalRecovery};
pub use writer::WalWriter;
