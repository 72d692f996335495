//! Tests for blob WAL entry encoding
//!
//! These tests verify:
//! - Multi-operation batches survive encode/decode
//! - CRC32 corruption detection
//! - Torn buffers decode as incomplete, not as errors

use chainstore::blob::wal::{Decoded, Operation, WalEntry, HEADER_SIZE};
use chainstore::StoreError;

fn decode(bytes: &[u8]) -> (WalEntry, usize) {
    match WalEntry::deserialize(bytes).unwrap() {
        Decoded::Entry(entry, consumed) => (entry, consumed),
        Decoded::Incomplete => panic!("expected a complete entry"),
    }
}

fn sample_batch() -> Vec<Operation> {
    vec![
        Operation::Put {
            key: b"block/1".to_vec(),
            value: vec![0xAB; 300],
        },
        Operation::Delete {
            key: b"block/0".to_vec(),
        },
        Operation::Put {
            key: b"metadata_commit_timestamp".to_vec(),
            value: 1_700_000_000_000i64.to_be_bytes().to_vec(),
        },
    ]
}

// =============================================================================
// Encoding Tests
// =============================================================================

#[test]
fn test_batch_survives_encoding() {
    let entry = WalEntry::new(7, sample_batch());
    let bytes = entry.serialize().unwrap();

    let (recovered, consumed) = decode(&bytes);

    assert_eq!(recovered, entry);
    assert_eq!(consumed, bytes.len());
}

#[test]
fn test_header_layout() {
    let entry = WalEntry::new(0x0102, sample_batch());
    let bytes = entry.serialize().unwrap();

    let lsn = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
    let len = u32::from_le_bytes(bytes[12..16].try_into().unwrap()) as usize;

    assert_eq!(lsn, 0x0102);
    assert_eq!(bytes.len(), HEADER_SIZE + len);
}

#[test]
fn test_decode_consumes_only_first_entry() {
    let first = WalEntry::new(1, vec![Operation::Delete { key: b"a".to_vec() }]);
    let second = WalEntry::new(2, sample_batch());
    let mut bytes = first.serialize().unwrap();
    let first_len = bytes.len();
    bytes.extend(second.serialize().unwrap());

    let (recovered, consumed) = decode(&bytes);
    assert_eq!(recovered.lsn, 1);
    assert_eq!(consumed, first_len);

    let (recovered, _) = decode(&bytes[consumed..]);
    assert_eq!(recovered, second);
}

#[test]
fn test_empty_batch() {
    let entry = WalEntry::new(3, Vec::new());
    let bytes = entry.serialize().unwrap();

    let (recovered, _) = decode(&bytes);
    assert!(recovered.operations.is_empty());
}

// =============================================================================
// CRC Corruption Detection Tests
// =============================================================================

#[test]
fn test_crc_corruption_detected() {
    let mut bytes = WalEntry::new(1, sample_batch()).serialize().unwrap();
    if let Some(byte) = bytes.last_mut() {
        *byte ^= 0xFF;
    }

    let result = WalEntry::deserialize(&bytes);
    assert!(matches!(result, Err(StoreError::WalCorruption(_))));
}

#[test]
fn test_crc_field_corruption_detected() {
    let mut bytes = WalEntry::new(1, sample_batch()).serialize().unwrap();
    bytes[8] ^= 0xFF;

    assert!(matches!(
        WalEntry::deserialize(&bytes),
        Err(StoreError::WalCorruption(_))
    ));
}

#[test]
fn test_absurd_length_is_corruption() {
    let mut bytes = WalEntry::new(1, sample_batch()).serialize().unwrap();
    bytes[12..16].copy_from_slice(&u32::MAX.to_le_bytes());

    assert!(matches!(
        WalEntry::deserialize(&bytes),
        Err(StoreError::WalCorruption(_))
    ));
}

// =============================================================================
// Torn Write Tests
// =============================================================================

#[test]
fn test_truncated_payload_is_incomplete() {
    let bytes = WalEntry::new(1, sample_batch()).serialize().unwrap();
    let truncated = &bytes[..HEADER_SIZE + 2];

    assert!(matches!(
        WalEntry::deserialize(truncated).unwrap(),
        Decoded::Incomplete
    ));
}

#[test]
fn test_short_header_is_incomplete() {
    let bytes = [0u8; 10];
    assert!(matches!(
        WalEntry::deserialize(&bytes).unwrap(),
        Decoded::Incomplete
    ));
}

#[test]
fn test_empty_buffer_is_incomplete() {
    assert!(matches!(
        WalEntry::deserialize(&[]).unwrap(),
        Decoded::Incomplete
    ));
}
