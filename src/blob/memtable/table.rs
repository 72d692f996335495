//! MemTable implementation

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::blob::wal::Operation;
use crate::blob::Record;

/// Fixed per-entry bookkeeping charged against the size limit
const ENTRY_OVERHEAD: usize = 16;

/// In-memory table for recent writes
pub struct MemTable {
    data: RwLock<BTreeMap<Vec<u8>, Record>>,
    /// Approximate size in bytes
    size: AtomicUsize,
}

impl MemTable {
    /// Create a new empty MemTable
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            size: AtomicUsize::new(0),
        }
    }

    /// Look up a key; `Some(Record::Tombstone)` means deleted here
    pub fn get(&self, key: &[u8]) -> Option<Record> {
        self.data.read().get(key).cloned()
    }

    /// True when this table holds any version of `key`
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.data.read().contains_key(key)
    }

    /// Put a key-value pair, returning the new approximate size
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> usize {
        let mut data = self.data.write();
        self.insert_locked(&mut data, key, Record::Value(value))
    }

    /// Insert a tombstone, returning the new approximate size
    pub fn delete(&self, key: Vec<u8>) -> usize {
        let mut data = self.data.write();
        self.insert_locked(&mut data, key, Record::Tombstone)
    }

    /// Apply a whole batch under one write lock so readers never see half of it
    pub fn apply(&self, operations: Vec<Operation>) -> usize {
        let mut data = self.data.write();
        let mut size = self.size.load(Ordering::SeqCst);
        for op in operations {
            size = match op {
                Operation::Put { key, value } => {
                    self.insert_locked(&mut data, key, Record::Value(value))
                }
                Operation::Delete { key } => self.insert_locked(&mut data, key, Record::Tombstone),
            };
        }
        size
    }

    fn insert_locked(
        &self,
        data: &mut BTreeMap<Vec<u8>, Record>,
        key: Vec<u8>,
        record: Record,
    ) -> usize {
        let added = key.len() + record.len() + ENTRY_OVERHEAD;
        let removed = data
            .get(&key)
            .map(|old| key.len() + old.len() + ENTRY_OVERHEAD)
            .unwrap_or(0);
        data.insert(key, record);

        if added >= removed {
            self.size.fetch_add(added - removed, Ordering::SeqCst) + (added - removed)
        } else {
            self.size.fetch_sub(removed - added, Ordering::SeqCst) - (removed - added)
        }
    }

    /// Get approximate size in bytes
    pub fn size(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    pub fn entry_count(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Sorted copy of every entry (for flush)
    pub fn snapshot(&self) -> Vec<(Vec<u8>, Record)> {
        self.data
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Clear all entries (after successful flush)
    pub fn clear(&self) {
        let mut data = self.data.write();
        data.clear();
        self.size.store(0, Ordering::SeqCst);
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}
