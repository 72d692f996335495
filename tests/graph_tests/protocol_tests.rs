//! Graph wire protocol tests
//!
//! Tests verify:
//! - Request and response framing (type, big-endian length, payload)
//! - Decoding rejects truncated, oversized and unknown frames
//! - Stream helpers read exactly one frame at a time

use std::io::Cursor;

use chainstore::graph::protocol::{
    decode_request, decode_response, encode_request, encode_response, read_request,
    read_response, write_request, write_response, Request, Response, Status, HEADER_SIZE,
    MAX_PAYLOAD_SIZE,
};
use chainstore::StoreError;

// =============================================================================
// Request Tests
// =============================================================================

#[test]
fn test_query_frame_layout() {
    let request = Request::Query {
        txn_id: 0x0102030405060708,
        read_only: true,
        query: b"{ tip }".to_vec(),
    };
    let bytes = encode_request(&request);

    assert_eq!(bytes[0], 0x01);
    assert_eq!(&bytes[1..5], &(9u32 + 7).to_be_bytes());
    assert_eq!(&bytes[5..13], &[1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(bytes[13], 1);
    assert_eq!(&bytes[14..], b"{ tip }");
}

#[test]
fn test_every_request_kind_decodes() {
    let requests = vec![
        Request::Query {
            txn_id: 1,
            read_only: false,
            query: Vec::new(),
        },
        Request::Mutate {
            txn_id: 2,
            payload: b"set".to_vec(),
        },
        Request::Commit { txn_id: 3 },
        Request::Discard { txn_id: 4 },
        Request::Ping,
    ];

    for request in requests {
        let decoded = decode_request(&encode_request(&request)).unwrap();
        assert_eq!(decoded, request);
    }
}

#[test]
fn test_ping_is_header_only() {
    let bytes = encode_request(&Request::Ping);
    assert_eq!(bytes.len(), HEADER_SIZE);
    assert_eq!(&bytes[..], &[0x05, 0, 0, 0, 0]);
}

#[test]
fn test_unknown_request_type() {
    let bytes = [0x7F, 0, 0, 0, 0];
    assert!(matches!(
        decode_request(&bytes),
        Err(StoreError::Protocol(_))
    ));
}

#[test]
fn test_commit_without_txn_id() {
    let bytes = [0x03, 0, 0, 0, 2, 0xAA, 0xBB];
    assert!(matches!(
        decode_request(&bytes),
        Err(StoreError::Protocol(_))
    ));
}

#[test]
fn test_ping_with_payload_rejected() {
    let bytes = [0x05, 0, 0, 0, 1, 0x00];
    assert!(decode_request(&bytes).is_err());
}

// =============================================================================
// Response Tests
// =============================================================================

#[test]
fn test_response_statuses() {
    for response in [
        Response::ok(b"result".to_vec()),
        Response::not_found(),
        Response::error("txn aborted"),
    ] {
        let decoded = decode_response(&encode_response(&response)).unwrap();
        assert_eq!(decoded, response);
    }
}

#[test]
fn test_error_response_carries_message() {
    let decoded = decode_response(&encode_response(&Response::error("conflict"))).unwrap();
    assert_eq!(decoded.status, Status::Error);
    assert_eq!(&decoded.payload[..], b"conflict");
}

#[test]
fn test_unknown_status() {
    assert!(decode_response(&[0x09, 0, 0, 0, 0]).is_err());
}

// =============================================================================
// Framing Error Tests
// =============================================================================

#[test]
fn test_short_header() {
    assert!(matches!(
        decode_response(&[0x00, 0, 0]),
        Err(StoreError::Protocol(_))
    ));
}

#[test]
fn test_truncated_payload() {
    let bytes = encode_response(&Response::ok(b"abcdef".to_vec()));
    assert!(decode_response(&bytes[..bytes.len() - 2]).is_err());
}

#[test]
fn test_oversized_payload_rejected() {
    let mut bytes = vec![0x00];
    bytes.extend_from_slice(&(MAX_PAYLOAD_SIZE + 1).to_be_bytes());
    assert!(decode_response(&bytes).is_err());

    let mut stream = Cursor::new(bytes);
    assert!(read_response(&mut stream).is_err());
}

// =============================================================================
// Stream Helper Tests
// =============================================================================

#[test]
fn test_stream_reads_consecutive_frames() {
    let mut buffer = Vec::new();
    write_request(&mut buffer, &Request::Ping).unwrap();
    write_request(
        &mut buffer,
        &Request::Mutate {
            txn_id: 9,
            payload: b"edge".to_vec(),
        },
    )
    .unwrap();

    let mut stream = Cursor::new(buffer);
    assert_eq!(read_request(&mut stream).unwrap(), Request::Ping);
    assert_eq!(
        read_request(&mut stream).unwrap(),
        Request::Mutate {
            txn_id: 9,
            payload: b"edge".to_vec()
        }
    );
    assert!(matches!(read_request(&mut stream), Err(StoreError::Io(_))));
}

#[test]
fn test_stream_response() {
    let mut buffer = Vec::new();
    write_response(&mut buffer, &Response::ok(b"42".to_vec())).unwrap();

    let response = read_response(&mut Cursor::new(buffer)).unwrap();
    assert_eq!(response.status, Status::Ok);
    assert_eq!(&response.payload[..], b"42");
}
