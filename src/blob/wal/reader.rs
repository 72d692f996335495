//! WAL Reader
//!
//! Handles reading entries from the WAL file.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::Result;

use super::entry::Decoded;
use super::WalEntry;

/// Reads entries from the WAL file
pub struct WalReader {
    data: Vec<u8>,
    position: usize,
}

/// What the reader found at its current position
#[derive(Debug)]
pub enum ReadOutcome {
    Entry(WalEntry),
    /// Clean end of log
    End,
    /// Trailing bytes that do not form a whole entry
    Torn { offset: u64 },
}

impl WalReader {
    /// Open a WAL file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let mut data = Vec::new();
        File::open(path)?.read_to_end(&mut data)?;
        Ok(Self { data, position: 0 })
    }

    /// Read the next entry from the WAL
    ///
    /// Corrupted entries surface as `WalCorruption` errors; the reader does
    /// not advance past them.
    pub fn next_entry(&mut self) -> Result<ReadOutcome> {
        if self.position >= self.data.len() {
            return Ok(ReadOutcome::End);
        }
        match WalEntry::deserialize(&self.data[self.position..])? {
            Decoded::Entry(entry, consumed) => {
                self.position += consumed;
                Ok(ReadOutcome::Entry(entry))
            }
            Decoded::Incomplete => Ok(ReadOutcome::Torn {
                offset: self.position as u64,
            }),
        }
    }

    /// Byte offset just past the last entry returned
    pub fn position(&self) -> u64 {
        self.position as u64
    }

    /// Total file length
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
