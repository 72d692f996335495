//! Segment Reader
//!
//! Opens segment files and serves O(log n) lookups via an in-memory index.
//! The file handle sits behind a mutex, so lookups only need `&self` and the
//! manager can serve concurrent reads under a shared lock.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::blob::Record;
use crate::error::{Result, StoreError};

use super::iterator::SegmentIterator;
use super::{ENTRY_PREFIX, FOOTER_SIZE, HEADER_SIZE, MAGIC, TOMBSTONE_MARKER, VERSION};

/// Location of one entry inside the data block
#[derive(Debug, Clone, Copy)]
struct Slot {
    offset: u64,
    /// Bytes the entry occupies, prefix included
    len: u64,
}

/// Reader for one segment file
pub struct SegmentReader {
    id: u64,
    path: PathBuf,
    file: Mutex<BufReader<File>>,
    index: BTreeMap<Vec<u8>, Slot>,
    index_offset: u64,
    file_size: u64,
}

impl SegmentReader {
    /// Open a segment, load its index and verify the data checksum
    pub fn open(id: u64, path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();
        if file_size < HEADER_SIZE + FOOTER_SIZE {
            return Err(corrupt(path, "file shorter than header and footer"));
        }

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;
        if &header[0..4] != MAGIC {
            return Err(corrupt(path, "bad magic"));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != VERSION {
            return Err(StoreError::Storage(format!(
                "unsupported segment version {} in {}",
                version,
                path.display()
            )));
        }
        let entry_count = le_u64(&header[6..14]);

        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let mut footer = [0u8; FOOTER_SIZE as usize];
        file.read_exact(&mut footer)?;
        let index_offset = le_u64(&footer[0..8]);
        let data_crc = le_u32(&footer[8..12]);
        if index_offset < HEADER_SIZE || index_offset > file_size - FOOTER_SIZE {
            return Err(corrupt(path, "index offset out of range"));
        }

        // Data block checksum
        file.seek(SeekFrom::Start(HEADER_SIZE))?;
        let mut data = vec![0u8; (index_offset - HEADER_SIZE) as usize];
        file.read_exact(&mut data)?;
        if crc32fast::hash(&data) != data_crc {
            return Err(corrupt(path, "data CRC mismatch"));
        }

        let mut index_data = vec![0u8; (file_size - FOOTER_SIZE - index_offset) as usize];
        file.read_exact(&mut index_data)?;
        let offsets = parse_index(&index_data).ok_or_else(|| corrupt(path, "truncated index"))?;
        if offsets.len() as u64 != entry_count {
            return Err(corrupt(path, "index does not match entry count"));
        }

        // Entry lengths fall out of consecutive offsets
        let mut ordered: Vec<(u64, Vec<u8>)> =
            offsets.into_iter().map(|(k, off)| (off, k)).collect();
        ordered.sort_by_key(|(off, _)| *off);
        let mut index = BTreeMap::new();
        for (i, (offset, key)) in ordered.iter().enumerate() {
            let end = ordered.get(i + 1).map(|(o, _)| *o).unwrap_or(index_offset);
            if end < offset + ENTRY_PREFIX {
                return Err(corrupt(path, "overlapping entries"));
            }
            index.insert(
                key.clone(),
                Slot {
                    offset: *offset,
                    len: end - offset,
                },
            );
        }

        Ok(Self {
            id,
            path: path.to_path_buf(),
            file: Mutex::new(BufReader::new(file)),
            index,
            index_offset,
            file_size,
        })
    }

    /// Look up a key in this segment
    ///
    /// `None` means the segment holds no version of the key.
    pub fn get(&self, key: &[u8]) -> Result<Option<Record>> {
        let slot = match self.index.get(key) {
            Some(slot) => *slot,
            None => return Ok(None),
        };

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(slot.offset))?;
        let mut prefix = [0u8; ENTRY_PREFIX as usize];
        file.read_exact(&mut prefix)?;
        let key_len = le_u32(&prefix[0..4]) as i64;
        let val_len = le_u32(&prefix[4..8]);
        file.seek(SeekFrom::Current(key_len))?;

        if val_len == TOMBSTONE_MARKER {
            return Ok(Some(Record::Tombstone));
        }
        let mut value = vec![0u8; val_len as usize];
        file.read_exact(&mut value)?;
        Ok(Some(Record::Value(value)))
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.index.contains_key(key)
    }

    /// Every key with the bytes its entry occupies, in key order
    pub fn entry_sizes(&self) -> impl Iterator<Item = (&[u8], u64)> + '_ {
        self.index.iter().map(|(k, slot)| (k.as_slice(), slot.len))
    }

    /// Visit every entry in file order
    pub fn for_each_entry<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(Vec<u8>, Record) -> Result<()>,
    {
        let mut file = self.file.lock();
        for item in SegmentIterator::new(&mut *file, self.index_offset)? {
            let (key, record) = item?;
            f(key, record)?;
        }
        Ok(())
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entry_count(&self) -> u64 {
        self.index.len() as u64
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Bytes of the data block (what GC can reclaim)
    pub fn data_size(&self) -> u64 {
        self.index_offset - HEADER_SIZE
    }
}

fn parse_index(data: &[u8]) -> Option<Vec<(Vec<u8>, u64)>> {
    let mut entries = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let key_len = le_u32(data.get(pos..pos + 4)?) as usize;
        pos += 4;
        let offset = le_u64(data.get(pos..pos + 8)?);
        pos += 8;
        let key = data.get(pos..pos + key_len)?.to_vec();
        pos += key_len;
        entries.push((key, offset));
    }
    Some(entries)
}

fn corrupt(path: &Path, reason: &str) -> StoreError {
    StoreError::Storage(format!("corrupt segment {}: {}", path.display(), reason))
}

pub(super) fn le_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

pub(super) fn le_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}
