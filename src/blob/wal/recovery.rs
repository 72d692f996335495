//! WAL Recovery
//!
//! Handles crash recovery by replaying the WAL.

use std::fs::OpenOptions;
use std::path::Path;

use crate::error::{Result, StoreError};

use super::reader::{ReadOutcome, WalReader};
use super::WalEntry;

/// Handles WAL recovery after crash
pub struct WalRecovery;

/// Result of a recovery operation
#[derive(Debug, Default)]
pub struct RecoveryResult {
    /// Number of entries successfully recovered
    pub entries_recovered: u64,

    /// Number of entries discarded (a torn tail or a CRC failure)
    pub entries_corrupted: u64,

    /// Last valid LSN
    pub last_lsn: u64,

    /// Whether the WAL was truncated (partial writes removed)
    pub was_truncated: bool,
}

impl WalRecovery {
    /// Recover entries from a WAL file
    ///
    /// Replays entries up to the first torn or corrupted one and truncates
    /// the file there. Everything after a bad entry is dropped: a later
    /// batch must never be applied without the ones before it.
    pub fn recover(path: &Path) -> Result<(Vec<WalEntry>, RecoveryResult)> {
        let (entries, result, valid_len) = Self::scan(path)?;
        if result.was_truncated {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        Ok((entries, result))
    }

    /// Verify integrity of a WAL file without modifying it
    pub fn verify(path: &Path) -> Result<RecoveryResult> {
        let (_, result, _) = Self::scan(path)?;
        Ok(result)
    }

    fn scan(path: &Path) -> Result<(Vec<WalEntry>, RecoveryResult, u64)> {
        let mut reader = WalReader::open(path)?;
        let mut entries = Vec::new();
        let mut result = RecoveryResult::default();

        loop {
            match reader.next_entry() {
                Ok(ReadOutcome::Entry(entry)) => {
                    result.entries_recovered += 1;
                    result.last_lsn = entry.lsn;
                    entries.push(entry);
                }
                Ok(ReadOutcome::End) => break,
                Ok(ReadOutcome::Torn { offset }) => {
                    tracing::warn!(offset, "blob WAL: dropping torn tail");
                    result.entries_corrupted += 1;
                    result.was_truncated = true;
                    break;
                }
                Err(StoreError::WalCorruption(reason)) | Err(StoreError::Serialization(reason)) => {
                    tracing::warn!(
                        offset = reader.position(),
                        %reason,
                        "blob WAL: corrupted entry, discarding the rest of the log"
                    );
                    result.entries_corrupted += 1;
                    result.was_truncated = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok((entries, result, reader.position()))
    }
}
