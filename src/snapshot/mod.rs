//! Snapshot Module
//!
//! Periodic compressed dumps of the full Store.
//!
//! ## Responsibilities
//! - Capture Store content and its LSN atomically
//! - Compress with zstd and write `RDB-{unix_seconds}` files crash-safely
//! - Read snapshots back for checkpoint recovery and inspection
//! - Run the capture on a background timer, off the dispatch path
//!
//! ## File Format
//! zstd-compressed JSON:
//! ```text
//! {"lsn": 42, "captured_at": 1700000000, "data": {"foo": "bar"}}
//! ```
//!
//! Snapshots are backups. The WAL stays authoritative, and only
//! `recover_from_snapshot` makes recovery start from one.

mod writer;
mod reader;
mod scheduler;

pub use writer::{SnapshotWriter, SnapshotInfo};
pub use reader::SnapshotReader;
pub use scheduler::Snapshotter;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::StoreImage;

/// File name prefix for snapshots
pub const SNAPSHOT_PREFIX: &str = "RDB-";

/// Decoded snapshot contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotImage {
    /// LSN of the last WAL entry reflected in `data`
    pub lsn: u64,

    /// Unix timestamp (seconds) of the capture
    pub captured_at: u64,

    /// Full Store content
    pub data: BTreeMap<String, Value>,
}

impl SnapshotImage {
    /// Convert into a Store image for restoring
    pub fn into_store_image(self) -> StoreImage {
        StoreImage {
            lsn: self.lsn,
            data: self.data,
        }
    }
}

/// Path of the snapshot captured at `timestamp`
pub fn snapshot_path(dir: &Path, timestamp: u64) -> PathBuf {
    dir.join(format!("{}{}", SNAPSHOT_PREFIX, timestamp))
}

/// Parse the capture timestamp out of a snapshot file name
pub fn parse_snapshot_name(name: &str) -> Option<u64> {
    name.strip_prefix(SNAPSHOT_PREFIX)?.parse().ok()
}
