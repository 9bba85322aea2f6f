//! Tests for WAL Recovery
//!
//! These tests verify:
//! - Recovery from a missing, empty or clean WAL
//! - Replay order decides the final state
//! - Checkpointed stores only receive the tail
//! - Corruption anywhere is fatal
//! - Verify mode (stats only, no Store)

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use courierkv::config::WalSyncStrategy;
use courierkv::error::CourierError;
use courierkv::store::{Store, StoreImage};
use courierkv::wal::{Operation, WalEntry, WalRecovery, WalWriter};
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

fn write_ops(path: &Path, ops: Vec<Operation>) {
    let mut writer = WalWriter::open(path, WalSyncStrategy::EveryWrite).unwrap();
    for op in ops {
        writer.append(op).unwrap();
    }
}

// =============================================================================
// Recover: Clean WAL Tests
// =============================================================================

#[test]
fn test_recover_missing_file() {
    let (_temp, wal_path) = setup_temp_wal();

    let (store, result) = WalRecovery::recover(&wal_path).unwrap();

    assert!(store.is_empty());
    assert_eq!(result.entries_replayed, 0);
    assert_eq!(result.last_lsn, 0);
    assert_eq!(result.checkpoint_lsn, None);
}

#[test]
fn test_recover_empty_file() {
    let (_temp, wal_path) = setup_temp_wal();
    File::create(&wal_path).unwrap();

    let (store, result) = WalRecovery::recover(&wal_path).unwrap();
    assert!(store.is_empty());
    assert_eq!(result.last_lsn, 0);
}

#[test]
fn test_recover_replays_in_order() {
    let (_temp, wal_path) = setup_temp_wal();
    write_ops(
        &wal_path,
        vec![
            set("a", json!(1)),
            set("b", json!(2)),
            Operation::Delete { key: "a".into() },
            set("b", json!(3)),
            Operation::Clear,
            set("c", json!({"x": true})),
        ],
    );

    let (store, result) = WalRecovery::recover(&wal_path).unwrap();

    assert_eq!(result.entries_replayed, 6);
    assert_eq!(result.last_lsn, 6);
    assert_eq!(store.to_json(), json!({"c": {"x": true}}));
    assert_eq!(store.applied_lsn(), 6);
}

#[test]
fn test_replayed_delete_of_absent_key_is_noop() {
    let (_temp, wal_path) = setup_temp_wal();
    write_ops(
        &wal_path,
        vec![Operation::Delete { key: "ghost".into() }, set("a", json!(1))],
    );

    let (store, result) = WalRecovery::recover(&wal_path).unwrap();
    assert_eq!(result.entries_replayed, 2);
    assert_eq!(store.to_json(), json!({"a": 1}));
}

// =============================================================================
// Replay From Checkpoint Tests
// =============================================================================

#[test]
fn test_replay_skips_checkpointed_entries() {
    let (_temp, wal_path) = setup_temp_wal();
    write_ops(
        &wal_path,
        vec![set("a", json!(1)), set("b", json!(2)), set("c", json!(3))],
    );

    let mut data = std::collections::BTreeMap::new();
    data.insert("a".to_string(), json!(1));
    data.insert("b".to_string(), json!(2));
    let store = Store::from_image(StoreImage { lsn: 2, data });

    let result = WalRecovery::replay(&wal_path, &store).unwrap();

    assert_eq!(result.entries_skipped, 2);
    assert_eq!(result.entries_replayed, 1);
    assert_eq!(result.checkpoint_lsn, Some(2));
    assert_eq!(store.to_json(), json!({"a": 1, "b": 2, "c": 3}));
}

// =============================================================================
// Recover: Corruption Tests
// =============================================================================

#[test]
fn test_torn_tail_is_fatal() {
    let (_temp, wal_path) = setup_temp_wal();
    write_ops(&wal_path, vec![set("a", json!(1))]);

    let torn = WalEntry::new(2, set("b", json!(2))).serialize().unwrap();
    let mut file = OpenOptions::new().append(true).open(&wal_path).unwrap();
    file.write_all(&torn[..torn.len() / 2]).unwrap();

    assert!(matches!(
        WalRecovery::recover(&wal_path),
        Err(CourierError::WalCorruption(_))
    ));
}

#[test]
fn test_garbage_file_is_fatal() {
    let (_temp, wal_path) = setup_temp_wal();
    std::fs::write(&wal_path, b"this is definitely not a write-ahead log").unwrap();

    assert!(matches!(
        WalRecovery::recover(&wal_path),
        Err(CourierError::WalCorruption(_))
    ));
}

#[test]
fn test_unappliable_entry_is_fatal() {
    let (_temp, wal_path) = setup_temp_wal();
    let mut file = File::create(&wal_path).unwrap();
    file.write_all(&WalEntry::new(1, set("", json!(1))).serialize().unwrap())
        .unwrap();

    assert!(matches!(
        WalRecovery::recover(&wal_path),
        Err(CourierError::WalCorruption(_))
    ));
}

// =============================================================================
// Verify Mode Tests
// =============================================================================

#[test]
fn test_verify_counts_entries() {
    let (_temp, wal_path) = setup_temp_wal();
    write_ops(&wal_path, (0..25).map(|i| set(&format!("k{}", i), json!(i))).collect());

    let result = WalRecovery::verify(&wal_path).unwrap();
    assert_eq!(result.entries_replayed, 25);
    assert_eq!(result.last_lsn, 25);
}

#[test]
fn test_verify_reports_corruption() {
    let (_temp, wal_path) = setup_temp_wal();
    write_ops(&wal_path, vec![set("a", json!(1))]);
    let mut file = OpenOptions::new().append(true).open(&wal_path).unwrap();
    file.write_all(&[1, 2, 3]).unwrap();

    assert!(WalRecovery::verify(&wal_path).is_err());
}
