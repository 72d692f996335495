//! Tests for the blob WAL writer and reader
//!
//! These tests verify:
//! - One LSN per appended batch, continuing from `next_lsn`
//! - Sync strategies (EveryWrite, EveryNEntries)
//! - Truncation
//! - A failed append never leaves later entries behind a partial one
//! - Reader sees exactly what the writer appended

use std::path::{Path, PathBuf};

use chainstore::blob::wal::{Operation, ReadOutcome, WalReader, WalRecovery, WalWriter};
use chainstore::config::WalSyncStrategy;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_wal() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let wal_path = temp_dir.path().join("wal.log");
    (temp_dir, wal_path)
}

fn put(key: &str, value: &str) -> Operation {
    Operation::Put {
        key: key.as_bytes().to_vec(),
        value: value.as_bytes().to_vec(),
    }
}

fn read_all(path: &Path) -> Vec<chainstore::blob::wal::WalEntry> {
    let mut reader = WalReader::open(path).unwrap();
    let mut entries = Vec::new();
    loop {
        match reader.next_entry().unwrap() {
            ReadOutcome::Entry(entry) => entries.push(entry),
            ReadOutcome::End => break,
            ReadOutcome::Torn { offset } => panic!("unexpected torn tail at {}", offset),
        }
    }
    entries
}

// =============================================================================
// Basic Writing Tests
// =============================================================================

#[test]
fn test_write_single_batch() {
    let (_temp, wal_path) = setup_temp_wal();

    let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite, 1).unwrap();
    let lsn = writer.append(vec![put("a", "1"), put("b", "2")]).unwrap();

    assert_eq!(lsn, 1);
    assert_eq!(writer.current_lsn(), 2);
}

#[test]
fn test_lsn_sequential() {
    let (_temp, wal_path) = setup_temp_wal();
    let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite, 1).unwrap();

    for i in 0..50u64 {
        let lsn = writer.append(vec![put(&format!("k{}", i), "v")]).unwrap();
        assert_eq!(lsn, i + 1);
    }
}

#[test]
fn test_lsn_continues_from_next_lsn() {
    let (_temp, wal_path) = setup_temp_wal();
    let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite, 42).unwrap();

    assert_eq!(writer.append(vec![put("k", "v")]).unwrap(), 42);
    assert_eq!(writer.current_lsn(), 43);
}

#[test]
fn test_zero_next_lsn_starts_at_one() {
    let (_temp, wal_path) = setup_temp_wal();
    let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite, 0).unwrap();

    assert_eq!(writer.append(vec![put("k", "v")]).unwrap(), 1);
}

// =============================================================================
// Sync Strategy Tests
// =============================================================================

#[test]
fn test_every_n_entries_data_readable_after_drop() {
    let (_temp, wal_path) = setup_temp_wal();

    {
        let mut writer =
            WalWriter::open(&wal_path, WalSyncStrategy::EveryNEntries { count: 10 }, 1).unwrap();
        for i in 0..5 {
            writer.append(vec![put(&format!("k{}", i), "v")]).unwrap();
        }
    }

    assert_eq!(read_all(&wal_path).len(), 5);
}

#[test]
fn test_explicit_sync() {
    let (_temp, wal_path) = setup_temp_wal();
    let mut writer =
        WalWriter::open(&wal_path, WalSyncStrategy::EveryNEntries { count: 1000 }, 1).unwrap();

    writer.append(vec![put("k", "v")]).unwrap();
    writer.sync().unwrap();

    assert_eq!(read_all(&wal_path).len(), 1);
}

// =============================================================================
// Truncation Tests
// =============================================================================

#[test]
fn test_truncate_empties_file() {
    let (_temp, wal_path) = setup_temp_wal();
    let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite, 1).unwrap();

    writer.append(vec![put("a", "1")]).unwrap();
    writer.append(vec![put("b", "2")]).unwrap();
    writer.truncate().unwrap();

    assert_eq!(std::fs::metadata(&wal_path).unwrap().len(), 0);
    assert!(read_all(&wal_path).is_empty());
}

#[test]
fn test_append_after_truncate() {
    let (_temp, wal_path) = setup_temp_wal();
    let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite, 1).unwrap();

    writer.append(vec![put("a", "1")]).unwrap();
    writer.truncate().unwrap();
    let lsn = writer.append(vec![put("b", "2")]).unwrap();

    // LSNs keep climbing across truncation
    assert_eq!(lsn, 2);
    let entries = read_all(&wal_path);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].lsn, 2);
}

// =============================================================================
// Failure Tests
// =============================================================================

#[test]
fn test_append_after_recovered_torn_tail_survives_next_recovery() {
    let (_temp, wal_path) = setup_temp_wal();
    {
        let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite, 1).unwrap();
        writer.append(vec![put("a", "1")]).unwrap();
    }
    {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&wal_path)
            .unwrap();
        file.write_all(&[0xEE; 9]).unwrap();
    }

    let (_, first) = WalRecovery::recover(&wal_path).unwrap();
    assert!(first.was_truncated);
    {
        let mut writer =
            WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite, first.last_lsn + 1).unwrap();
        writer.append(vec![put("b", "2")]).unwrap();
    }

    let (entries, second) = WalRecovery::recover(&wal_path).unwrap();
    assert!(!second.was_truncated);
    let lsns: Vec<u64> = entries.iter().map(|e| e.lsn).collect();
    assert_eq!(lsns, vec![1, 2]);
}

#[cfg(target_os = "linux")]
#[test]
fn test_failed_append_does_not_advance_lsn() {
    // Every write to /dev/full fails with ENOSPC
    let full = Path::new("/dev/full");
    if !full.exists() {
        return;
    }
    let mut writer = WalWriter::open(full, WalSyncStrategy::EveryWrite, 7).unwrap();

    assert!(writer.append(vec![put("a", "1")]).is_err());
    assert!(writer.append(vec![put("b", "2")]).is_err());
    assert_eq!(writer.current_lsn(), 7);
}

// =============================================================================
// Reader Tests
// =============================================================================

#[test]
fn test_reader_sees_batches_in_order() {
    let (_temp, wal_path) = setup_temp_wal();

    {
        let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite, 1).unwrap();
        writer.append(vec![put("a", "1"), put("b", "2")]).unwrap();
        writer
            .append(vec![Operation::Delete { key: b"a".to_vec() }])
            .unwrap();
    }

    let entries = read_all(&wal_path);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].operations.len(), 2);
    assert_eq!(entries[0].operations[1], put("b", "2"));
    assert_eq!(entries[1].operations[0].key(), b"a");
}

#[test]
fn test_reader_reopen_appends() {
    let (_temp, wal_path) = setup_temp_wal();

    {
        let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite, 1).unwrap();
        writer.append(vec![put("a", "1")]).unwrap();
    }
    {
        let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite, 2).unwrap();
        writer.append(vec![put("b", "2")]).unwrap();
    }

    let lsns: Vec<u64> = read_all(&wal_path).iter().map(|e| e.lsn).collect();
    assert_eq!(lsns, vec![1, 2]);
}

#[test]
fn test_reader_empty_file() {
    let (_temp, wal_path) = setup_temp_wal();
    std::fs::File::create(&wal_path).unwrap();

    let mut reader = WalReader::open(&wal_path).unwrap();
    assert!(reader.is_empty());
    assert!(matches!(reader.next_entry().unwrap(), ReadOutcome::End));
}

#[test]
fn test_reader_reports_torn_offset() {
    let (_temp, wal_path) = setup_temp_wal();

    {
        let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite, 1).unwrap();
        writer.append(vec![put("a", "1")]).unwrap();
    }
    let good_len = std::fs::metadata(&wal_path).unwrap().len();
    {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&wal_path)
            .unwrap();
        file.write_all(&[1, 2, 3]).unwrap();
    }

    let mut reader = WalReader::open(&wal_path).unwrap();
    assert!(matches!(reader.next_entry().unwrap(), ReadOutcome::Entry(_)));
    match reader.next_entry().unwrap() {
        ReadOutcome::Torn { offset } => assert_eq!(offset, good_len),
        other => panic!("expected torn tail, got {:?}", other),
    }
}
