//! WAL Writer
//!
//! Handles appending entries to the WAL file.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::WalSyncStrategy;
use crate::error::{CourierError, Result};
use super::{Operation, WalEntry, WalReader};

/// Writes entries to the WAL file
///
/// Every append is a single sequential write at the end of the file.
/// A failed append truncates the file back to its last good length so
/// a torn frame never sits in front of later records. If that truncation
/// fails too, the writer is poisoned and refuses every later append until
/// the WAL is reopened.
pub struct WalWriter {
    file: File,
    path: PathBuf,
    next_lsn: u64,

    /// Length of the file up to the last successful append
    len: u64,

    sync_strategy: WalSyncStrategy,
    uncommitted: usize,

    /// A torn frame may remain at the end of the file
    poisoned: bool,
}

impl WalWriter {
    /// Open or create a WAL file, continuing after its last entry
    ///
    /// Scans the existing file to find the last LSN; a corrupt file
    /// is reported rather than appended to.
    pub fn open(path: &Path, sync_strategy: WalSyncStrategy) -> Result<Self> {
        let mut last_lsn = 0;
        if path.exists() {
            for entry in WalReader::open(path)?.entries() {
                last_lsn = entry?.lsn;
            }
        }
        Self::resume(path, last_lsn + 1, sync_strategy)
    }

    /// Open or create a WAL file whose next entry gets `next_lsn`
    ///
    /// Used after recovery, which has already scanned the file.
    pub fn resume(path: &Path, next_lsn: u64, sync_strategy: WalSyncStrategy) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            file,
            path: path.to_path_buf(),
            next_lsn: next_lsn.max(1),
            len,
            sync_strategy,
            uncommitted: 0,
            poisoned: false,
        })
    }

    /// Append an operation to the WAL
    ///
    /// Returns the entry as written. Any failure is a `WalWrite` error and
    /// leaves the LSN counter unchanged.
    pub fn append(&mut self, operation: Operation) -> Result<WalEntry> {
        if self.poisoned {
            return Err(CourierError::WalWrite(format!(
                "{} holds a partial frame and must be reopened",
                self.path.display()
            )));
        }

        let entry = WalEntry::new(self.next_lsn, operation);
        let frame = entry.serialize()?;

        if let Err(e) = self.write_frame(&frame) {
            self.rollback();
            return Err(CourierError::WalWrite(format!(
                "append of lsn {} ({}) failed: {}",
                entry.lsn,
                entry.operation.name(),
                e
            )));
        }

        self.len += frame.len() as u64;
        self.next_lsn += 1;

        tracing::trace!(lsn = entry.lsn, op = entry.operation.name(), "WAL append");
        Ok(entry)
    }

    fn write_frame(&mut self, frame: &[u8]) -> std::io::Result<()> {
        self.file.write_all(frame)?;
        self.uncommitted += 1;

        let due = match self.sync_strategy {
            WalSyncStrategy::EveryWrite => true,
            WalSyncStrategy::EveryNEntries { count } => self.uncommitted >= count,
        };
        if due {
            self.file.sync_data()?;
            self.uncommitted = 0;
        }
        Ok(())
    }

    fn rollback(&mut self) {
        if let Err(e) = self.file.set_len(self.len) {
            tracing::error!(
                path = %self.path.display(),
                len = self.len,
                error = %e,
                "Failed to truncate WAL after failed append, refusing further writes"
            );
            self.poisoned = true;
        }
        self.uncommitted = 0;
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        self.uncommitted = 0;
        Ok(())
    }

    /// LSN the next append will get
    pub fn next_lsn(&self) -> u64 {
        self.next_lsn
    }

    /// LSN of the last appended entry (0 if none)
    pub fn last_lsn(&self) -> u64 {
        self.next_lsn - 1
    }

    /// Entries written since the last fsync
    pub fn uncommitted_count(&self) -> usize {
        self.uncommitted
    }

    /// Path of the WAL file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a failed rollback left the writer unusable
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }
}
