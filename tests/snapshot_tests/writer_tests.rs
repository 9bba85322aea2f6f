//! Tests for snapshot writing and reading
//!
//! These tests verify:
//! - Files are zstd-compressed JSON named `RDB-{unix_seconds}`
//! - Content and LSN are captured together
//! - Listing ignores temp and foreign files

use std::fs;

use courierkv::snapshot::{SnapshotImage, SnapshotReader, SnapshotWriter};
use courierkv::store::Store;
use serde_json::{json, Value};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn store_with(pairs: &[(&str, Value)]) -> Store {
    let store = Store::new();
    for (key, value) in pairs {
        store.apply_set(key, value.clone()).unwrap();
    }
    store
}

// =============================================================================
// Format Tests
// =============================================================================

#[test]
fn test_file_is_compressed_json() {
    let temp = TempDir::new().unwrap();
    let writer = SnapshotWriter::new(temp.path(), 3).unwrap();
    let store = store_with(&[("foo", json!("bar")), ("n", json!(0))]);

    let info = writer.write_image(store.image(), 1_700_000_000).unwrap();

    assert_eq!(info.path, temp.path().join("RDB-1700000000"));
    assert_eq!(info.keys, 2);

    let raw = fs::read(&info.path).unwrap();
    assert_eq!(info.bytes, raw.len() as u64);
    let json: Value = serde_json::from_slice(&zstd::decode_all(raw.as_slice()).unwrap()).unwrap();
    assert_eq!(
        json,
        json!({"lsn": 0, "captured_at": 1_700_000_000u64, "data": {"foo": "bar", "n": 0}})
    );
}

#[test]
fn test_read_back() {
    let temp = TempDir::new().unwrap();
    let writer = SnapshotWriter::new(temp.path(), 3).unwrap();
    let store = store_with(&[("a", json!({"nested": [1, 2]}))]);

    let info = writer.write(&store).unwrap();
    let image: SnapshotImage = SnapshotReader::read(&info.path).unwrap();

    assert_eq!(image.captured_at, info.captured_at);
    assert_eq!(image.data.get("a"), Some(&json!({"nested": [1, 2]})));
}

#[test]
fn test_empty_store_snapshot() {
    let temp = TempDir::new().unwrap();
    let writer = SnapshotWriter::new(temp.path(), 3).unwrap();

    let info = writer.write(&Store::new()).unwrap();
    let image = SnapshotReader::read(&info.path).unwrap();
    assert!(image.data.is_empty());
}

#[test]
fn test_creates_missing_directory() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("deep").join("snapshots");

    let writer = SnapshotWriter::new(&dir, 1).unwrap();
    writer.write(&Store::new()).unwrap();
    assert_eq!(SnapshotReader::list(&dir).unwrap().len(), 1);
}

#[test]
fn test_corrupt_snapshot_is_error() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("RDB-1");
    fs::write(&path, b"not zstd").unwrap();

    assert!(matches!(
        SnapshotReader::read(&path),
        Err(courierkv::CourierError::Snapshot(_))
    ));
}

// =============================================================================
// Listing Tests
// =============================================================================

#[test]
fn test_list_orders_by_timestamp() {
    let temp = TempDir::new().unwrap();
    let writer = SnapshotWriter::new(temp.path(), 3).unwrap();
    let store = Store::new();

    for ts in [300u64, 100, 200] {
        writer.write_image(store.image(), ts).unwrap();
    }
    fs::write(temp.path().join(".RDB-400.tmp"), b"partial").unwrap();
    fs::write(temp.path().join("notes.txt"), b"foreign").unwrap();

    let timestamps: Vec<u64> = SnapshotReader::list(temp.path())
        .unwrap()
        .into_iter()
        .map(|(ts, _)| ts)
        .collect();
    assert_eq!(timestamps, vec![100, 200, 300]);
    assert_eq!(
        SnapshotReader::latest(temp.path()).unwrap(),
        Some(temp.path().join("RDB-300"))
    );
}

#[test]
fn test_list_missing_directory() {
    let temp = TempDir::new().unwrap();
    let missing = temp.path().join("nope");

    assert!(SnapshotReader::list(&missing).unwrap().is_empty());
    assert_eq!(SnapshotReader::latest(&missing).unwrap(), None);
}

#[test]
fn test_no_temp_file_left_behind() {
    let temp = TempDir::new().unwrap();
    let writer = SnapshotWriter::new(temp.path(), 3).unwrap();
    writer.write_image(Store::new().image(), 42).unwrap();

    let names: Vec<String> = fs::read_dir(temp.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["RDB-42".to_string()]);
}
