//! Crash-consistency check
//!
//! Every read-write commit writes the same timestamp into the metadata
//! store and the blob store, blob first and metadata last. After an unclean
//! shutdown between the two, the markers disagree.

use crate::blob::{BlobStore, COMMIT_TIMESTAMP_KEY};
use crate::error::{Result, StoreError};
use crate::metadata::MetadataStore;

/// State of the commit markers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMarker {
    /// Neither store has ever seen a commit
    Fresh,
    /// Both markers agree
    Consistent(i64),
}

/// Compare the commit markers of both stores
///
/// Returns `StoreError::Inconsistency` when one marker is missing, either is
/// not a positive timestamp, the blob marker cannot be decoded, or they
/// differ. Backend failures pass through unchanged.
pub fn check_commit_timestamp(metadata: &dyn MetadataStore, blob: &BlobStore) -> Result<CommitMarker> {
    let meta_ts = metadata.get_commit_timestamp(None)?;
    let blob_ts = match blob.get(COMMIT_TIMESTAMP_KEY)? {
        None => None,
        Some(bytes) => Some(decode_timestamp(&bytes)?),
    };

    match (meta_ts, blob_ts) {
        (None, None) => Ok(CommitMarker::Fresh),
        (Some(m), Some(b)) if m > 0 && m == b => Ok(CommitMarker::Consistent(m)),
        (Some(m), Some(b)) if m <= 0 || b <= 0 => Err(StoreError::Inconsistency(format!(
            "invalid commit timestamp (metadata {}, blob {})",
            m, b
        ))),
        (Some(m), Some(b)) => Err(StoreError::Inconsistency(format!(
            "commit timestamp mismatch: metadata {}, blob {}",
            m, b
        ))),
        (Some(m), None) => Err(StoreError::Inconsistency(format!(
            "blob commit timestamp missing (metadata {})",
            m
        ))),
        (None, Some(b)) => Err(StoreError::Inconsistency(format!(
            "metadata commit timestamp missing (blob {})",
            b
        ))),
    }
}

pub(crate) fn encode_timestamp(timestamp: i64) -> [u8; 8] {
    timestamp.to_be_bytes()
}

pub(crate) fn decode_timestamp(bytes: &[u8]) -> Result<i64> {
    let raw: [u8; 8] = bytes.try_into().map_err(|_| {
        StoreError::Inconsistency(format!(
            "blob commit timestamp has {} bytes, expected 8",
            bytes.len()
        ))
    })?;
    Ok(i64::from_be_bytes(raw))
}
