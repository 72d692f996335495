//! WAL Writer
//!
//! Handles appending entries to the WAL file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::config::WalSyncStrategy;
use crate::error::{Result, StoreError};

use super::{Operation, WalEntry};

/// Writes entries to the WAL file
pub struct WalWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    next_lsn: u64,
    sync_strategy: WalSyncStrategy,
    /// Entries written since the last fsync
    unsynced: usize,
    /// File length at the end of the last complete entry
    len: u64,
    /// Set when a failed append could not be undone
    poisoned: bool,
}

impl WalWriter {
    /// Open a WAL file for appending, creating it if missing.
    ///
    /// `next_lsn` continues the sequence of a recovered log.
    pub fn open(path: &Path, sync_strategy: WalSyncStrategy, next_lsn: u64) -> Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        let len = file.seek(SeekFrom::End(0))?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            next_lsn: next_lsn.max(1),
            sync_strategy,
            unsynced: 0,
            len,
            poisoned: false,
        })
    }

    /// Append one batch of operations, returning its LSN
    ///
    /// A failed write is cut back off the file, so the next append starts
    /// on an entry boundary. If that is impossible the writer refuses every
    /// later append rather than bury them behind a torn entry.
    pub fn append(&mut self, operations: Vec<Operation>) -> Result<u64> {
        if self.poisoned {
            return Err(StoreError::Storage(
                "WAL writer unusable after an unrecovered write failure".to_string(),
            ));
        }
        let lsn = self.next_lsn;
        let bytes = WalEntry::new(lsn, operations).serialize()?;

        let written = self
            .writer
            .write_all(&bytes)
            .and_then(|_| self.writer.flush());
        if let Err(e) = written {
            if let Err(rewind_err) = self.rewind() {
                tracing::error!(
                    path = %self.path.display(),
                    error = %rewind_err,
                    "blob WAL: cannot remove partial entry, refusing further writes"
                );
                self.poisoned = true;
            }
            return Err(StoreError::Storage(format!("WAL write failed: {}", e)));
        }
        self.len += bytes.len() as u64;
        self.next_lsn += 1;
        self.unsynced += 1;

        let due = match self.sync_strategy {
            WalSyncStrategy::EveryWrite => true,
            WalSyncStrategy::EveryNEntries { count } => self.unsynced >= count.max(1),
        };
        if due {
            self.sync()?;
        }
        Ok(lsn)
    }

    /// Throw away buffered bytes and cut the file back to `len`
    fn rewind(&mut self) -> std::io::Result<()> {
        let file = self.writer.get_ref().try_clone()?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        // Drops the unwritten buffer without flushing it
        drop(stale.into_parts());

        let file = self.writer.get_mut();
        file.set_len(self.len)?;
        file.seek(SeekFrom::Start(self.len))?;
        Ok(())
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        self.unsynced = 0;
        Ok(())
    }

    /// Drop every entry (their effects are durable elsewhere)
    pub fn truncate(&mut self) -> Result<()> {
        self.writer.flush()?;
        let file = self.writer.get_mut();
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.sync_all()?;
        self.unsynced = 0;
        self.len = 0;
        Ok(())
    }

    /// LSN the next append will receive
    pub fn current_lsn(&self) -> u64 {
        self.next_lsn
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }
}
