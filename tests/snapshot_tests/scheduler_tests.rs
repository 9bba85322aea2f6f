//! Tests for the background snapshot timer

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use courierkv::snapshot::{SnapshotReader, Snapshotter};
use courierkv::{Config, Engine};
use serde_json::json;
use tempfile::TempDir;

fn wait_for_snapshot(dir: &std::path::Path, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if !SnapshotReader::list(dir).unwrap().is_empty() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn test_timer_writes_snapshots() {
    let temp = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp.path())
        .snapshot_interval(Duration::from_millis(50))
        .build();
    let engine = Arc::new(Engine::open(config).unwrap());
    engine.set("a", json!(1)).unwrap();

    let snapshotter = Snapshotter::spawn(Arc::clone(&engine), Duration::from_millis(50)).unwrap();
    assert!(wait_for_snapshot(engine.snapshot_dir(), Duration::from_secs(5)));
    snapshotter.stop();

    let latest = SnapshotReader::latest(engine.snapshot_dir()).unwrap().unwrap();
    let image = SnapshotReader::read(&latest).unwrap();
    assert_eq!(image.lsn, 1);
    assert_eq!(image.data.get("a"), Some(&json!(1)));
}

#[test]
fn test_stop_is_prompt() {
    let temp = TempDir::new().unwrap();
    let engine = Arc::new(Engine::open_path(temp.path()).unwrap());

    let snapshotter = Snapshotter::spawn(Arc::clone(&engine), Duration::from_secs(3600)).unwrap();
    let started = Instant::now();
    snapshotter.stop();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(SnapshotReader::list(engine.snapshot_dir()).unwrap().is_empty());
}
