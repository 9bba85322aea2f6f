//! WAL Reader
//!
//! Handles reading entries from the WAL file.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};

use crate::error::{CourierError, Result};
use super::entry::{WalEntry, HEADER_SIZE};

/// Reads entries from the WAL file in append order
///
/// Any malformed frame (short header, short payload, CRC mismatch,
/// unparsable JSON, LSN gap) is a `WalCorruption` error naming its offset.
pub struct WalReader {
    reader: BufReader<File>,
    path: PathBuf,
    position: u64,
    last_lsn: u64,
}

impl WalReader {
    /// Open a WAL file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            path: path.to_path_buf(),
            position: 0,
            last_lsn: 0,
        })
    }

    /// Open a fresh iterator over every entry of the file
    ///
    /// Each call starts again from the beginning.
    pub fn read_all(path: &Path) -> Result<WalIterator> {
        Ok(Self::open(path)?.entries())
    }

    /// Read the next entry from the WAL
    ///
    /// Returns `Ok(None)` at a clean end of file.
    pub fn next_entry(&mut self) -> Result<Option<WalEntry>> {
        let offset = self.position;

        let mut header = [0u8; HEADER_SIZE];
        let read = self.read_up_to(&mut header)?;
        if read == 0 {
            return Ok(None);
        }
        if read < HEADER_SIZE {
            return Err(self.corruption(offset, format!(
                "truncated header ({} of {} bytes)",
                read, HEADER_SIZE
            )));
        }

        let (lsn, crc, len) =
            WalEntry::decode_header(&header).map_err(|e| self.corruption(offset, e.to_string()))?;

        let mut payload = vec![0u8; len as usize];
        let read = self.read_up_to(&mut payload)?;
        if read < payload.len() {
            return Err(self.corruption(offset, format!(
                "truncated payload ({} of {} bytes)",
                read, len
            )));
        }

        let entry = WalEntry::from_parts(lsn, crc, &payload)
            .map_err(|e| self.corruption(offset, e.to_string()))?;

        if self.last_lsn != 0 && entry.lsn != self.last_lsn + 1 {
            return Err(self.corruption(offset, format!(
                "lsn {} does not follow {}",
                entry.lsn, self.last_lsn
            )));
        }
        if entry.lsn == 0 {
            return Err(self.corruption(offset, "lsn 0 is reserved".to_string()));
        }

        self.last_lsn = entry.lsn;
        Ok(Some(entry))
    }

    /// Iterate over all entries, stopping after the first error
    pub fn entries(self) -> WalIterator {
        WalIterator {
            reader: self,
            done: false,
        }
    }

    /// Byte offset of the next frame
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Fill `buf` as far as the file allows, returning the bytes read
    fn read_up_to(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        self.position += filled as u64;
        Ok(filled)
    }

    fn corruption(&self, offset: u64, detail: String) -> CourierError {
        CourierError::WalCorruption(format!(
            "{} at offset {}: {}",
            self.path.display(),
            offset,
            detail
        ))
    }
}

/// Iterator over WAL entries
pub struct WalIterator {
    reader: WalReader,
    done: bool,
}

impl Iterator for WalIterator {
    type Item = Result<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
