//! Graph store wire protocol
//!
//! Length-prefixed binary frames over TCP.
//!
//! ## Wire Format
//!
//! ### Request Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Type (1) │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Payload by Request Type
//! - QUERY:   txn_id (8) + read_only (1) + query
//! - MUTATE:  txn_id (8) + mutation
//! - COMMIT:  txn_id (8)
//! - DISCARD: txn_id (8)
//! - PING:    empty
//!
//! ### Response Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │Status(1) │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! All integers are big-endian.

use std::io::{Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, StoreError};

/// Header size: 1 byte type/status + 4 bytes length
pub const HEADER_SIZE: usize = 5;

/// Maximum payload size (16 MB)
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestType {
    Query = 0x01,
    Mutate = 0x02,
    Commit = 0x03,
    Discard = 0x04,
    Ping = 0x05,
}

/// A request to the graph store
///
/// Transactions are server-side and keyed by a client-chosen id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Query {
        txn_id: u64,
        read_only: bool,
        query: Vec<u8>,
    },
    Mutate {
        txn_id: u64,
        payload: Vec<u8>,
    },
    Commit {
        txn_id: u64,
    },
    Discard {
        txn_id: u64,
    },
    Ping,
}

impl Request {
    pub fn request_type(&self) -> RequestType {
        match self {
            Request::Query { .. } => RequestType::Query,
            Request::Mutate { .. } => RequestType::Mutate,
            Request::Commit { .. } => RequestType::Commit,
            Request::Discard { .. } => RequestType::Discard,
            Request::Ping => RequestType::Ping,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 0x00,
    NotFound = 0x01,
    Error = 0x02,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub payload: Bytes,
}

impl Response {
    pub fn ok(payload: impl Into<Bytes>) -> Self {
        Self {
            status: Status::Ok,
            payload: payload.into(),
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: Status::NotFound,
            payload: Bytes::new(),
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            status: Status::Error,
            payload: Bytes::copy_from_slice(message.as_bytes()),
        }
    }
}

// =============================================================================
// Request Encoding/Decoding
// =============================================================================

pub fn encode_request(request: &Request) -> Bytes {
    let mut payload = BytesMut::new();
    match request {
        Request::Query {
            txn_id,
            read_only,
            query,
        } => {
            payload.reserve(9 + query.len());
            payload.put_u64(*txn_id);
            payload.put_u8(u8::from(*read_only));
            payload.put_slice(query);
        }
        Request::Mutate { txn_id, payload: m } => {
            payload.reserve(8 + m.len());
            payload.put_u64(*txn_id);
            payload.put_slice(m);
        }
        Request::Commit { txn_id } | Request::Discard { txn_id } => {
            payload.put_u64(*txn_id);
        }
        Request::Ping => {}
    }
    frame(request.request_type() as u8, &payload)
}

pub fn decode_request(bytes: &[u8]) -> Result<Request> {
    let (kind, mut payload) = unframe(bytes)?;
    let request = match kind {
        0x01 => {
            let txn_id = take_txn_id(&mut payload, "QUERY")?;
            if !payload.has_remaining() {
                return Err(StoreError::Protocol(
                    "QUERY request: missing read-only flag".to_string(),
                ));
            }
            let read_only = payload.get_u8() != 0;
            Request::Query {
                txn_id,
                read_only,
                query: payload.to_vec(),
            }
        }
        0x02 => {
            let txn_id = take_txn_id(&mut payload, "MUTATE")?;
            Request::Mutate {
                txn_id,
                payload: payload.to_vec(),
            }
        }
        0x03 => Request::Commit {
            txn_id: take_txn_id(&mut payload, "COMMIT")?,
        },
        0x04 => Request::Discard {
            txn_id: take_txn_id(&mut payload, "DISCARD")?,
        },
        0x05 => {
            if payload.has_remaining() {
                return Err(StoreError::Protocol(format!(
                    "PING request: unexpected payload of {} bytes",
                    payload.len()
                )));
            }
            Request::Ping
        }
        other => {
            return Err(StoreError::Protocol(format!(
                "Unknown request type: 0x{:02x}",
                other
            )))
        }
    };
    Ok(request)
}

fn take_txn_id(payload: &mut &[u8], name: &str) -> Result<u64> {
    if payload.remaining() < 8 {
        return Err(StoreError::Protocol(format!(
            "{} request: missing transaction id",
            name
        )));
    }
    Ok(payload.get_u64())
}

// =============================================================================
// Response Encoding/Decoding
// =============================================================================

pub fn encode_response(response: &Response) -> Bytes {
    frame(response.status as u8, &response.payload)
}

pub fn decode_response(bytes: &[u8]) -> Result<Response> {
    let (status, payload) = unframe(bytes)?;
    let status = match status {
        0x00 => Status::Ok,
        0x01 => Status::NotFound,
        0x02 => Status::Error,
        other => {
            return Err(StoreError::Protocol(format!(
                "Unknown response status: 0x{:02x}",
                other
            )))
        }
    };
    Ok(Response {
        status,
        payload: Bytes::copy_from_slice(payload),
    })
}

fn frame(kind: u8, payload: &[u8]) -> Bytes {
    let mut message = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    message.put_u8(kind);
    message.put_u32(payload.len() as u32);
    message.put_slice(payload);
    message.freeze()
}

/// Split a complete frame into its type byte and payload
fn unframe(bytes: &[u8]) -> Result<(u8, &[u8])> {
    if bytes.len() < HEADER_SIZE {
        return Err(StoreError::Protocol(format!(
            "Incomplete header: expected {} bytes, got {}",
            HEADER_SIZE,
            bytes.len()
        )));
    }
    let mut header = &bytes[..HEADER_SIZE];
    let kind = header.get_u8();
    let payload_len = header.get_u32();
    check_payload_len(payload_len)?;

    let total_len = HEADER_SIZE + payload_len as usize;
    if bytes.len() < total_len {
        return Err(StoreError::Protocol(format!(
            "Incomplete payload: expected {} bytes, got {}",
            total_len,
            bytes.len()
        )));
    }
    Ok((kind, &bytes[HEADER_SIZE..total_len]))
}

fn check_payload_len(len: u32) -> Result<()> {
    if len > MAX_PAYLOAD_SIZE {
        return Err(StoreError::Protocol(format!(
            "Payload too large: {} bytes (max {})",
            len, MAX_PAYLOAD_SIZE
        )));
    }
    Ok(())
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read one whole frame, header included
fn read_frame<R: Read>(reader: &mut R) -> Result<BytesMut> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;
    let payload_len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    check_payload_len(payload_len)?;

    let mut message = BytesMut::zeroed(HEADER_SIZE + payload_len as usize);
    message[..HEADER_SIZE].copy_from_slice(&header);
    reader.read_exact(&mut message[HEADER_SIZE..])?;
    Ok(message)
}

pub fn read_request<R: Read>(reader: &mut R) -> Result<Request> {
    decode_request(&read_frame(reader)?)
}

pub fn write_request<W: Write>(writer: &mut W, request: &Request) -> Result<()> {
    writer.write_all(&encode_request(request))?;
    writer.flush()?;
    Ok(())
}

pub fn read_response<R: Read>(reader: &mut R) -> Result<Response> {
    decode_response(&read_frame(reader)?)
}

pub fn write_response<W: Write>(writer: &mut W, response: &Response) -> Result<()> {
    writer.write_all(&encode_response(response))?;
    writer.flush()?;
    Ok(())
}
