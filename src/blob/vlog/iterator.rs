//! Segment Iterator
//!
//! Sequential iteration over the data block of a segment.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};

use crate::blob::Record;
use crate::error::Result;

use super::reader::le_u32;
use super::{ENTRY_PREFIX, HEADER_SIZE, TOMBSTONE_MARKER};

/// Iterator over segment entries in key order
pub struct SegmentIterator<'a> {
    file: &'a mut BufReader<File>,
    /// Start of the index block
    end_offset: u64,
    current_offset: u64,
}

impl<'a> SegmentIterator<'a> {
    pub(super) fn new(file: &'a mut BufReader<File>, end_offset: u64) -> Result<Self> {
        file.seek(SeekFrom::Start(HEADER_SIZE))?;
        Ok(Self {
            file,
            end_offset,
            current_offset: HEADER_SIZE,
        })
    }

    fn read_entry(&mut self) -> Result<(Vec<u8>, Record)> {
        let mut prefix = [0u8; ENTRY_PREFIX as usize];
        self.file.read_exact(&mut prefix)?;
        let key_len = le_u32(&prefix[0..4]) as usize;
        let val_len = le_u32(&prefix[4..8]);

        let mut key = vec![0u8; key_len];
        self.file.read_exact(&mut key)?;
        self.current_offset += ENTRY_PREFIX + key_len as u64;

        if val_len == TOMBSTONE_MARKER {
            return Ok((key, Record::Tombstone));
        }
        let mut value = vec![0u8; val_len as usize];
        self.file.read_exact(&mut value)?;
        self.current_offset += val_len as u64;
        Ok((key, Record::Value(value)))
    }
}

impl<'a> Iterator for SegmentIterator<'a> {
    type Item = Result<(Vec<u8>, Record)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_offset >= self.end_offset {
            return None;
        }
        match self.read_entry() {
            Ok(entry) => Some(Ok(entry)),
            Err(e) => {
                // Stop after the first failure
                self.current_offset = self.end_offset;
                Some(Err(e))
            }
        }
    }
}
