//! Engine Module
//!
//! The persistence core that coordinates Store, WAL and snapshots.
//!
//! ## Responsibilities
//! - Provision the data and snapshot directories
//! - Rebuild the Store from the WAL on startup
//! - Log every mutation before applying it
//! - Capture snapshots on request

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde_json::Value;

use crate::config::Config;
use crate::error::{CourierError, Result};
use crate::protocol::{Command, Response};
use crate::snapshot::{SnapshotImage, SnapshotInfo, SnapshotReader, SnapshotWriter};
use crate::store::{validate_key, Store};
use crate::wal::{Operation, RecoveryResult, WalRecovery, WalWriter};

/// The storage engine
///
/// ## Concurrency Model
///
/// - **Writes** (set/delete/clear): serialized by the `wal` mutex.
///   The order is always: lock WAL → append → apply to Store → unlock,
///   so Store content always equals the replay of the WAL.
/// - **Reads** (get, snapshots): take the Store read lock only.
///   A snapshot captures data and its LSN under that one lock.
pub struct Engine {
    config: Config,

    /// In-memory state
    store: Store,

    /// Write-ahead log (exclusive access needed)
    wal: Mutex<WalWriter>,

    snapshots: SnapshotWriter,

    /// Statistics from startup recovery
    recovery: RecoveryResult,
}

impl Engine {
    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Create data and snapshot directories
    /// 2. Rebuild the Store (full WAL replay, or snapshot + WAL tail)
    /// 3. Resume the WAL after its last entry
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        fs::create_dir_all(&config.data_dir).map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!("cannot create data directory {}: {}", config.data_dir.display(), e),
            )
        })?;
        let snapshots =
            SnapshotWriter::new(config.snapshot_dir(), config.snapshot_compression_level)?;

        let wal_path = config.wal_path();
        let (store, recovery) = Self::recover(&config, &wal_path)?;

        tracing::info!(
            replayed = recovery.entries_replayed,
            skipped = recovery.entries_skipped,
            last_lsn = recovery.last_lsn,
            checkpoint = ?recovery.checkpoint_lsn,
            keys = store.len(),
            "Recovery complete"
        );

        let wal = WalWriter::resume(&wal_path, recovery.last_lsn + 1, config.wal_sync_strategy)?;

        Ok(Self {
            config,
            store,
            wal: Mutex::new(wal),
            snapshots,
            recovery,
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    fn recover(config: &Config, wal_path: &Path) -> Result<(Store, RecoveryResult)> {
        if config.recover_from_snapshot {
            if let Some(image) = Self::load_checkpoint(&config.snapshot_dir()) {
                let checkpoint = image.lsn;
                let store = Store::from_image(image.into_store_image());
                let result = WalRecovery::replay(wal_path, &store)?;
                if result.last_lsn >= checkpoint {
                    return Ok((store, result));
                }
                tracing::warn!(
                    checkpoint,
                    wal_last_lsn = result.last_lsn,
                    "WAL ends before the snapshot checkpoint, replaying from empty"
                );
            }
        }

        WalRecovery::recover(wal_path)
    }

    fn load_checkpoint(dir: &Path) -> Option<SnapshotImage> {
        let path = match SnapshotReader::latest(dir) {
            Ok(Some(path)) => path,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "Cannot list snapshots, using full replay");
                return None;
            }
        };

        match SnapshotReader::read(&path) {
            Ok(image) => {
                tracing::info!(path = %path.display(), lsn = image.lsn, "Recovering from snapshot");
                Some(image)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Newest snapshot unreadable, using full replay");
                None
            }
        }
    }

    /// Execute a command
    ///
    /// Routes commands to the matching operation and builds its response.
    pub fn execute(&self, command: Command) -> Result<Response> {
        match command {
            Command::Set { key, value } => self.set(&key, value).map(Response::stored),
            Command::Get { key } => self.get(&key).map(Response::value),
            Command::Delete { key } => {
                self.delete(&key)?;
                Ok(Response::deleted(&key))
            }
            Command::Clear => {
                self.clear()?;
                Ok(Response::cleared())
            }
        }
    }

    /// Insert or overwrite a key, returning the stored `{key: value}` pair
    pub fn set(&self, key: &str, value: Value) -> Result<Value> {
        validate_key(key)?;
        let mut wal = self.wal.lock();
        self.commit(
            &mut wal,
            Operation::Set {
                key: key.to_string(),
                value,
            },
        )
    }

    /// Get a value by key
    pub fn get(&self, key: &str) -> Result<Value> {
        self.store.apply_get(key)
    }

    /// Delete a key
    ///
    /// An absent key is `KeyNotFound` and writes nothing to the WAL.
    pub fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        let mut wal = self.wal.lock();
        if !self.store.contains_key(key) {
            return Err(CourierError::KeyNotFound);
        }
        self.commit(&mut wal, Operation::Delete { key: key.to_string() })?;
        Ok(())
    }

    /// Remove every key
    pub fn clear(&self) -> Result<()> {
        let mut wal = self.wal.lock();
        self.commit(&mut wal, Operation::Clear)?;
        Ok(())
    }

    /// Append, then apply. Called with the WAL lock held.
    fn commit(&self, wal: &mut WalWriter, operation: Operation) -> Result<Value> {
        let entry = wal.append(operation)?;
        self.store.apply_entry(&entry)
    }

    /// Write a snapshot of the current Store
    pub fn snapshot(&self) -> Result<SnapshotInfo> {
        self.snapshots.write(&self.store)
    }

    /// Force the WAL to disk
    pub fn sync(&self) -> Result<()> {
        self.wal.lock().sync()
    }

    /// Close the engine gracefully
    pub fn close(self) -> Result<()> {
        self.sync()
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the in-memory Store
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Get the WAL path
    pub fn wal_path(&self) -> PathBuf {
        self.config.wal_path()
    }

    /// Get the snapshot directory path
    pub fn snapshot_dir(&self) -> &Path {
        self.snapshots.dir()
    }

    /// LSN of the last logged mutation
    pub fn last_lsn(&self) -> u64 {
        self.wal.lock().last_lsn()
    }

    /// Statistics from startup recovery
    pub fn recovery(&self) -> &RecoveryResult {
        &self.recovery
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Swap the WAL for one whose every write fails
    #[cfg(all(test, target_os = "linux"))]
    pub(crate) fn with_failing_wal(self) -> Result<Self> {
        let wal = WalWriter::resume(
            Path::new("/dev/full"),
            self.last_lsn() + 1,
            crate::config::WalSyncStrategy::EveryWrite,
        )?;
        Ok(Self {
            wal: Mutex::new(wal),
            ..self
        })
    }
}
