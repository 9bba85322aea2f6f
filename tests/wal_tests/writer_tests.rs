//! Tests for WAL Writer
//!
//! These tests verify:
//! - Writing entries to WAL
//! - LSN generation and sequencing
//! - Sync strategies (EveryWrite, EveryNEntries)
//! - Reopening continues the sequence
//! - Integration with reader

use std::path::{Path, PathBuf};

use courierkv::config::WalSyncStrategy;
use courierkv::wal::{Operation, WalReader, WalWriter};
use serde_json::{json, Value};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_wal() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let wal_path = temp_dir.path().join("wal.log");
    (temp_dir, wal_path)
}

fn set(key: &str, value: Value) -> Operation {
    Operation::Set {
        key: key.to_string(),
        value,
    }
}

fn read_lsns(path: &Path) -> Vec<u64> {
    WalReader::open(path)
        .unwrap()
        .entries()
        .map(|e| e.unwrap().lsn)
        .collect()
}

// =============================================================================
// Basic Writing Tests
// =============================================================================

#[test]
fn test_write_single_entry() {
    let (_temp, wal_path) = setup_temp_wal();

    let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite).unwrap();
    let entry = writer.append(set("key1", json!("value1"))).unwrap();

    assert_eq!(entry.lsn, 1);
    assert_eq!(writer.last_lsn(), 1);
    assert_eq!(writer.next_lsn(), 2);
}

#[test]
fn test_lsn_sequential() {
    let (_temp, wal_path) = setup_temp_wal();

    let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite).unwrap();
    let lsns: Vec<u64> = (0..100)
        .map(|i| writer.append(set(&format!("key{}", i), json!(i))).unwrap().lsn)
        .collect();

    assert_eq!(lsns, (1..=100).collect::<Vec<u64>>());
}

#[test]
fn test_reopen_continues_sequence() {
    let (_temp, wal_path) = setup_temp_wal();

    {
        let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite).unwrap();
        writer.append(set("a", json!(1))).unwrap();
        writer.append(Operation::Clear).unwrap();
    }

    let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite).unwrap();
    assert_eq!(writer.last_lsn(), 2);
    assert_eq!(writer.append(set("b", json!(2))).unwrap().lsn, 3);
    drop(writer);

    assert_eq!(read_lsns(&wal_path), vec![1, 2, 3]);
}

#[test]
fn test_resume_at_given_lsn() {
    let (_temp, wal_path) = setup_temp_wal();

    let mut writer = WalWriter::resume(&wal_path, 1, WalSyncStrategy::EveryWrite).unwrap();
    assert_eq!(writer.last_lsn(), 0);
    writer.append(Operation::Clear).unwrap();
    assert_eq!(writer.path(), wal_path.as_path());
}

// =============================================================================
// Sync Strategy Tests
// =============================================================================

#[test]
fn test_sync_every_write() {
    let (_temp, wal_path) = setup_temp_wal();

    let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite).unwrap();

    writer.append(set("k1", json!("v1"))).unwrap();
    assert_eq!(writer.uncommitted_count(), 0);

    writer.append(set("k2", json!("v2"))).unwrap();
    assert_eq!(writer.uncommitted_count(), 0);
}

#[test]
fn test_sync_every_n_entries() {
    let (_temp, wal_path) = setup_temp_wal();

    let mut writer =
        WalWriter::open(&wal_path, WalSyncStrategy::EveryNEntries { count: 5 }).unwrap();

    for i in 0..4 {
        writer.append(set(&format!("k{}", i), json!("v"))).unwrap();
    }
    assert_eq!(writer.uncommitted_count(), 4);

    // 5th entry triggers sync
    writer.append(set("k5", json!("v"))).unwrap();
    assert_eq!(writer.uncommitted_count(), 0);

    writer.append(set("k6", json!("v"))).unwrap();
    assert_eq!(writer.uncommitted_count(), 1);
}

#[test]
fn test_manual_sync() {
    let (_temp, wal_path) = setup_temp_wal();

    let mut writer =
        WalWriter::open(&wal_path, WalSyncStrategy::EveryNEntries { count: 100 }).unwrap();
    for i in 0..10 {
        writer.append(set(&format!("k{}", i), json!("v"))).unwrap();
    }
    assert_eq!(writer.uncommitted_count(), 10);

    writer.sync().unwrap();
    assert_eq!(writer.uncommitted_count(), 0);
}

// =============================================================================
// Write + Read Integration Tests
// =============================================================================

#[test]
fn test_write_then_read() {
    let (_temp, wal_path) = setup_temp_wal();

    {
        let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite).unwrap();
        writer.append(set("key1", json!("value1"))).unwrap();
        writer.append(set("key2", json!({"n": 2}))).unwrap();
        writer.append(Operation::Delete { key: "key1".into() }).unwrap();
        writer.append(Operation::Clear).unwrap();
    }

    let mut reader = WalReader::open(&wal_path).unwrap();

    let entry = reader.next_entry().unwrap().unwrap();
    assert_eq!(entry.lsn, 1);
    assert_eq!(entry.operation, set("key1", json!("value1")));

    let entry = reader.next_entry().unwrap().unwrap();
    assert_eq!(entry.operation, set("key2", json!({"n": 2})));

    let entry = reader.next_entry().unwrap().unwrap();
    assert!(matches!(entry.operation, Operation::Delete { .. }));

    let entry = reader.next_entry().unwrap().unwrap();
    assert_eq!(entry.lsn, 4);
    assert_eq!(entry.operation, Operation::Clear);

    // EOF
    assert!(reader.next_entry().unwrap().is_none());
}

#[test]
fn test_write_read_many_entries() {
    let (_temp, wal_path) = setup_temp_wal();
    let entry_count = 1000;

    {
        let mut writer =
            WalWriter::open(&wal_path, WalSyncStrategy::EveryNEntries { count: 100 }).unwrap();
        for i in 0..entry_count {
            writer.append(set(&format!("key{}", i), json!(i))).unwrap();
        }
        writer.sync().unwrap();
    }

    let lsns = read_lsns(&wal_path);
    assert_eq!(lsns.len(), entry_count);
    assert_eq!(lsns.last(), Some(&(entry_count as u64)));
}

// =============================================================================
// Edge Cases
// =============================================================================

#[test]
fn test_large_entry() {
    let (_temp, wal_path) = setup_temp_wal();
    let large_value = "x".repeat(1024 * 1024);

    {
        let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite).unwrap();
        writer.append(set("big_key", json!(large_value))).unwrap();
    }

    let mut reader = WalReader::open(&wal_path).unwrap();
    match reader.next_entry().unwrap().unwrap().operation {
        Operation::Set { value, .. } => assert_eq!(value, json!(large_value)),
        other => panic!("Expected Set operation, got {:?}", other),
    }
}

#[test]
fn test_failed_append_keeps_lsn() {
    let (_temp, wal_path) = setup_temp_wal();

    let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite).unwrap();
    writer.append(set("a", json!(1))).unwrap();

    let huge = "x".repeat(courierkv::wal::MAX_PAYLOAD_SIZE as usize);
    assert!(writer.append(set("big", json!(huge))).is_err());
    assert_eq!(writer.last_lsn(), 1);

    assert_eq!(writer.append(set("b", json!(2))).unwrap().lsn, 2);
    drop(writer);
    assert_eq!(read_lsns(&wal_path), vec![1, 2]);
}
