//! Snapshot reader
//!
//! Decompresses snapshot files and finds the newest one.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{CourierError, Result};
use super::{parse_snapshot_name, SnapshotImage};

/// Reads snapshot files
pub struct SnapshotReader;

impl SnapshotReader {
    /// Read and decode one snapshot file
    pub fn read(path: &Path) -> Result<SnapshotImage> {
        let compressed = fs::read(path)?;
        let json = zstd::decode_all(compressed.as_slice()).map_err(|e| {
            CourierError::Snapshot(format!("{}: zstd decoder: {}", path.display(), e))
        })?;
        serde_json::from_slice(&json)
            .map_err(|e| CourierError::Snapshot(format!("{}: decode: {}", path.display(), e)))
    }

    /// All snapshots in a directory, oldest first
    ///
    /// A missing directory has no snapshots. Temp files and foreign
    /// files are ignored.
    pub fn list(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut snapshots = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            if let Some(timestamp) = name.to_str().and_then(parse_snapshot_name) {
                snapshots.push((timestamp, entry.path()));
            }
        }

        snapshots.sort_by_key(|(timestamp, _)| *timestamp);
        Ok(snapshots)
    }

    /// Newest snapshot in a directory, if any
    pub fn latest(dir: &Path) -> Result<Option<PathBuf>> {
        Ok(Self::list(dir)?.pop().map(|(_, path)| path))
    }
}
