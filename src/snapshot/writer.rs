//! Crash-safe snapshot writer
//!
//! Uses the write-fsync-rename pattern:
//! 1. Write compressed bytes to `.RDB-{ts}.tmp`
//! 2. fsync the temporary file
//! 3. Rename to `RDB-{ts}`
//! 4. fsync the parent directory (best effort)
//!
//! Either a complete snapshot exists or none does.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{CourierError, Result};
use crate::store::{Store, StoreImage};
use super::{snapshot_path, SnapshotImage, SNAPSHOT_PREFIX};

/// Writes compressed snapshots into one directory
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    dir: PathBuf,
    compression_level: i32,
}

/// What a completed snapshot contains
#[derive(Debug, Clone)]
pub struct SnapshotInfo {
    pub path: PathBuf,
    pub lsn: u64,
    pub captured_at: u64,
    pub keys: usize,
    pub bytes: u64,
}

impl SnapshotWriter {
    /// Create a writer, creating the directory if needed
    pub fn new(dir: impl Into<PathBuf>, compression_level: i32) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            compression_level,
        })
    }

    /// Get the snapshots directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Capture the Store now and write it
    pub fn write(&self, store: &Store) -> Result<SnapshotInfo> {
        let captured_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| CourierError::Snapshot(format!("system clock before epoch: {}", e)))?
            .as_secs();
        self.write_image(store.image(), captured_at)
    }

    /// Write an already captured image under the given timestamp
    ///
    /// An existing snapshot with the same timestamp is replaced.
    pub fn write_image(&self, image: StoreImage, captured_at: u64) -> Result<SnapshotInfo> {
        let keys = image.data.len();
        let lsn = image.lsn;
        let snapshot = SnapshotImage {
            lsn,
            captured_at,
            data: image.data,
        };

        let json = serde_json::to_vec(&snapshot)
            .map_err(|e| CourierError::Snapshot(format!("encode: {}", e)))?;
        let compressed = zstd::encode_all(json.as_slice(), self.compression_level)
            .map_err(|e| CourierError::Snapshot(format!("zstd encoder: {}", e)))?;

        let final_path = snapshot_path(&self.dir, captured_at);
        let temp_path = self
            .dir
            .join(format!(".{}{}.tmp", SNAPSHOT_PREFIX, captured_at));

        match Self::persist(&temp_path, &final_path, &compressed) {
            Ok(()) => Ok(SnapshotInfo {
                path: final_path,
                lsn,
                captured_at,
                keys,
                bytes: compressed.len() as u64,
            }),
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                Err(CourierError::Snapshot(format!(
                    "{}: {}",
                    final_path.display(),
                    e
                )))
            }
        }
    }

    fn persist(temp_path: &Path, final_path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let mut file = File::create(temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);

        fs::rename(temp_path, final_path)?;

        #[cfg(unix)]
        if let Some(parent) = final_path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        Ok(())
    }
}
