//! WAL Entry definitions
//!
//! One entry holds every operation of one committed blob batch, so a batch
//! is either replayed whole or not at all.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Entry header: LSN (8) + CRC (4) + payload length (4)
pub const HEADER_SIZE: usize = 16;

/// Upper bound on a single payload; anything larger is treated as corruption
pub const MAX_PAYLOAD_SIZE: u32 = 256 * 1024 * 1024;

/// A single entry in the WAL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Log Sequence Number - monotonically increasing
    pub lsn: u64,

    /// Operations applied atomically by this entry
    pub operations: Vec<Operation>,

    /// Timestamp (unix millis) when entry was created
    pub timestamp: u64,
}

/// Operations that can be logged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Put a key-value pair
    Put { key: Vec<u8>, value: Vec<u8> },

    /// Delete a key
    Delete { key: Vec<u8> },
}

impl Operation {
    pub fn key(&self) -> &[u8] {
        match self {
            Operation::Put { key, .. } | Operation::Delete { key } => key,
        }
    }
}

/// Body of an entry as written to disk (the LSN lives in the header)
#[derive(Serialize, Deserialize)]
struct Payload {
    operations: Vec<Operation>,
    timestamp: u64,
}

/// Outcome of decoding one entry from a byte buffer
#[derive(Debug)]
pub enum Decoded {
    /// A complete, checksummed entry and the bytes it occupied
    Entry(WalEntry, usize),

    /// The buffer ends before the entry does (torn write)
    Incomplete,
}

impl WalEntry {
    pub fn new(lsn: u64, operations: Vec<Operation>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            lsn,
            operations,
            timestamp,
        }
    }

    /// Encode as `[lsn][crc][len][payload]`
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(&Payload {
            operations: self.operations.clone(),
            timestamp: self.timestamp,
        })?;
        if payload.len() > MAX_PAYLOAD_SIZE as usize {
            return Err(StoreError::Storage(format!(
                "WAL entry too large: {} bytes",
                payload.len()
            )));
        }

        let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
        bytes.extend_from_slice(&self.lsn.to_le_bytes());
        bytes.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    /// Decode the entry at the start of `bytes`
    ///
    /// A CRC mismatch or an oversized length is `WalCorruption`; running out
    /// of bytes is `Decoded::Incomplete`.
    pub fn deserialize(bytes: &[u8]) -> Result<Decoded> {
        if bytes.len() < HEADER_SIZE {
            return Ok(Decoded::Incomplete);
        }
        let (lsn, crc, len) = parse_header(&bytes[..HEADER_SIZE]);
        if len > MAX_PAYLOAD_SIZE {
            return Err(StoreError::WalCorruption(format!(
                "entry lsn={} claims {} payload bytes",
                lsn, len
            )));
        }

        let end = HEADER_SIZE + len as usize;
        if bytes.len() < end {
            return Ok(Decoded::Incomplete);
        }
        let payload = &bytes[HEADER_SIZE..end];
        if crc32fast::hash(payload) != crc {
            return Err(StoreError::WalCorruption(format!(
                "CRC mismatch at lsn={}",
                lsn
            )));
        }

        let body: Payload = bincode::deserialize(payload)?;
        Ok(Decoded::Entry(
            WalEntry {
                lsn,
                operations: body.operations,
                timestamp: body.timestamp,
            },
            end,
        ))
    }
}

/// Split a header into (lsn, crc, payload length)
pub(crate) fn parse_header(header: &[u8]) -> (u64, u32, u32) {
    let mut lsn = [0u8; 8];
    let mut crc = [0u8; 4];
    let mut len = [0u8; 4];
    lsn.copy_from_slice(&header[0..8]);
    crc.copy_from_slice(&header[8..12]);
    len.copy_from_slice(&header[12..16]);
    (
        u64::from_le_bytes(lsn),
        u32::from_le_bytes(crc),
        u32::from_le_bytes(len),
    )
}
