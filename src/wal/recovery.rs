//! WAL Recovery
//!
//! Rebuilds a Store by replaying the WAL in append order.

use std::path::Path;

use crate::error::{CourierError, Result};
use crate::store::Store;
use super::WalReader;

/// Handles WAL replay at startup
pub struct WalRecovery;

/// Result of a recovery operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Number of entries applied to the Store
    pub entries_replayed: u64,

    /// Entries already covered by the snapshot checkpoint
    pub entries_skipped: u64,

    /// Last LSN present in the WAL (0 if empty or missing)
    pub last_lsn: u64,

    /// LSN the Store already reflected before replay, if any
    pub checkpoint_lsn: Option<u64>,
}

impl WalRecovery {
    /// Replay a WAL into a fresh Store
    ///
    /// A missing WAL yields an empty Store. Any parse failure is fatal.
    pub fn recover(path: &Path) -> Result<(Store, RecoveryResult)> {
        let store = Store::new();
        let result = Self::replay(path, &store)?;
        Ok((store, result))
    }

    /// Replay a WAL into an existing Store
    ///
    /// Entries at or below the Store's applied LSN are skipped, so a Store
    /// restored from a snapshot only receives the tail written after it.
    /// Entries go straight to the Store and are never re-logged.
    pub fn replay(path: &Path, store: &Store) -> Result<RecoveryResult> {
        let checkpoint = store.applied_lsn();
        let mut result = RecoveryResult {
            checkpoint_lsn: (checkpoint > 0).then_some(checkpoint),
            ..RecoveryResult::default()
        };

        if !path.exists() {
            tracing::info!(path = %path.display(), "No WAL found, nothing to recover");
            return Ok(result);
        }

        for entry in WalReader::read_all(path)? {
            let entry = entry?;
            result.last_lsn = entry.lsn;

            if entry.lsn <= checkpoint {
                result.entries_skipped += 1;
                continue;
            }

            store.apply_entry(&entry).map_err(|e| {
                CourierError::WalCorruption(format!(
                    "entry at lsn {} ({}) cannot be applied: {}",
                    entry.lsn,
                    entry.operation.name(),
                    e
                ))
            })?;
            result.entries_replayed += 1;
        }

        Ok(result)
    }

    /// Verify integrity of a WAL file without building a Store
    pub fn verify(path: &Path) -> Result<RecoveryResult> {
        let mut result = RecoveryResult::default();
        if !path.exists() {
            return Ok(result);
        }

        for entry in WalReader::read_all(path)? {
            result.last_lsn = entry?.lsn;
            result.entries_replayed += 1;
        }
        Ok(result)
    }
}
