//! Blob store transactions
//!
//! Writes are buffered and applied as one batch on commit; reads see the
//! transaction's own pending writes first.

use std::collections::BTreeMap;

use crate::blob::wal::Operation;
use crate::blob::BlobStore;
use crate::error::{Result, StoreError};

pub struct BlobTxn<'a> {
    store: &'a BlobStore,
    read_write: bool,
    /// `None` marks a pending delete
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<'a> BlobTxn<'a> {
    pub(crate) fn new(store: &'a BlobStore, read_write: bool) -> Self {
        Self {
            store,
            read_write,
            pending: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(pending) = self.pending.get(key) {
            return Ok(pending.clone());
        }
        self.store.get(key)
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        self.pending.insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        self.pending.insert(key.to_vec(), None);
        Ok(())
    }

    /// Apply every pending write as one atomic batch
    pub fn commit(self) -> Result<()> {
        let store = self.store;
        store.apply(self.into_operations())
    }

    /// Commit and return the batch that reverts it
    ///
    /// Used when a later step of a cross-backend commit can still fail.
    pub(crate) fn commit_with_undo(self) -> Result<Vec<Operation>> {
        let store = self.store;
        store.apply_with_undo(self.into_operations())
    }

    fn into_operations(self) -> Vec<Operation> {
        self.pending
            .into_iter()
            .map(|(key, value)| match value {
                Some(value) => Operation::Put { key, value },
                None => Operation::Delete { key },
            })
            .collect()
    }

    /// Drop pending writes
    pub fn discard(self) {}

    pub fn is_read_write(&self) -> bool {
        self.read_write
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn ensure_writable(&self) -> Result<()> {
        if !self.read_write {
            return Err(StoreError::ReadOnly);
        }
        Ok(())
    }
}
