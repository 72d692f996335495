//! Segment Builder
//!
//! Writes sorted entries to a new segment file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::blob::Record;
use crate::error::{Result, StoreError};

use super::{SegmentMeta, ENTRY_PREFIX, HEADER_SIZE, MAGIC, TOMBSTONE_MARKER, VERSION};

/// Builder for creating new segments from sorted entries
pub struct SegmentBuilder {
    path: PathBuf,
    writer: BufWriter<File>,
    entry_count: u64,
    /// Offset the next entry will be written at
    offset: u64,
    /// key → offset of its entry
    index: Vec<(Vec<u8>, u64)>,
    last_key: Option<Vec<u8>>,
    data_crc: crc32fast::Hasher,
}

impl SegmentBuilder {
    /// Create the file and write a header with a placeholder count
    pub fn new(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);

        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&0u64.to_le_bytes())?;

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            entry_count: 0,
            offset: HEADER_SIZE,
            index: Vec::new(),
            last_key: None,
            data_crc: crc32fast::Hasher::new(),
        })
    }

    /// Append one record; keys must arrive in strictly increasing order
    pub fn add(&mut self, key: &[u8], record: &Record) -> Result<()> {
        if let Some(last) = &self.last_key {
            if key <= last.as_slice() {
                return Err(StoreError::Storage(
                    "segment keys must be added in ascending order".to_string(),
                ));
            }
        }

        let val_len = match record {
            Record::Value(v) => v.len() as u32,
            Record::Tombstone => TOMBSTONE_MARKER,
        };

        let mut prefix = [0u8; ENTRY_PREFIX as usize];
        prefix[0..4].copy_from_slice(&(key.len() as u32).to_le_bytes());
        prefix[4..8].copy_from_slice(&val_len.to_le_bytes());

        self.writer.write_all(&prefix)?;
        self.writer.write_all(key)?;
        self.data_crc.update(&prefix);
        self.data_crc.update(key);
        if let Record::Value(v) = record {
            self.writer.write_all(v)?;
            self.data_crc.update(v);
        }

        self.index.push((key.to_vec(), self.offset));
        self.offset += ENTRY_PREFIX + key.len() as u64 + record.len() as u64;
        self.entry_count += 1;
        self.last_key = Some(key.to_vec());
        Ok(())
    }

    /// Write index block and footer, patch the header count, fsync
    pub fn finish(mut self) -> Result<SegmentMeta> {
        let index_offset = self.offset;

        for (key, offset) in &self.index {
            self.writer.write_all(&(key.len() as u32).to_le_bytes())?;
            self.writer.write_all(&offset.to_le_bytes())?;
            self.writer.write_all(key)?;
        }

        self.writer.write_all(&index_offset.to_le_bytes())?;
        self.writer.write_all(&self.data_crc.finalize().to_le_bytes())?;
        self.writer.write_all(&[0u8; 4])?;
        self.writer.flush()?;

        let mut file = self
            .writer
            .into_inner()
            .map_err(|e| StoreError::Storage(format!("failed to flush segment: {}", e)))?;
        file.seek(SeekFrom::Start(6))?;
        file.write_all(&self.entry_count.to_le_bytes())?;
        file.sync_all()?;

        Ok(SegmentMeta {
            path: self.path,
            entry_count: self.entry_count,
            file_size: file.metadata()?.len(),
        })
    }
}
