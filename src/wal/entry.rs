//! WAL Entry definitions
//!
//! Defines the structure of individual WAL log entries and their framing.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CourierError, Result};

/// Frame header: LSN (8) + CRC (4) + payload length (4)
pub const HEADER_SIZE: usize = 16;

/// Maximum payload size (16 MB)
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// A single entry in the WAL
#[derive(Debug, Clone, PartialEq)]
pub struct WalEntry {
    /// Log Sequence Number - starts at 1, increases by one per entry
    pub lsn: u64,

    /// The operation to replay
    pub operation: Operation,
}

/// Operations that can be logged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "lowercase")]
pub enum Operation {
    /// Insert or overwrite a key
    Set {
        key: String,
        #[serde(default)]
        value: Value,
    },

    /// Remove a key
    Delete { key: String },

    /// Remove every key
    Clear,
}

impl Operation {
    /// Name used in the log and in log messages
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Set { .. } => "set",
            Operation::Delete { .. } => "delete",
            Operation::Clear => "clear",
        }
    }
}

impl WalEntry {
    pub fn new(lsn: u64, operation: Operation) -> Self {
        Self { lsn, operation }
    }

    /// Encode as a complete frame (header + payload)
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let payload = serde_json::to_vec(&self.operation)?;
        if payload.len() > MAX_PAYLOAD_SIZE as usize {
            return Err(CourierError::WalWrite(format!(
                "entry too large: {} bytes (max {})",
                payload.len(),
                MAX_PAYLOAD_SIZE
            )));
        }

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        buf.put_u64(self.lsn);
        buf.put_u32(Self::compute_crc(self.lsn, &payload));
        buf.put_u32(payload.len() as u32);
        buf.put_slice(&payload);

        Ok(buf.to_vec())
    }

    /// Decode a complete frame
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(CourierError::WalCorruption(format!(
                "incomplete header: expected {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }

        let (lsn, crc, len) = Self::decode_header(&bytes[..HEADER_SIZE])?;
        let payload = &bytes[HEADER_SIZE..];
        if payload.len() < len as usize {
            return Err(CourierError::WalCorruption(format!(
                "incomplete payload: expected {} bytes, got {}",
                len,
                payload.len()
            )));
        }

        Self::from_parts(lsn, crc, &payload[..len as usize])
    }

    /// Split a header into (lsn, crc, payload length)
    pub(crate) fn decode_header(mut header: &[u8]) -> Result<(u64, u32, u32)> {
        let lsn = header.get_u64();
        let crc = header.get_u32();
        let len = header.get_u32();

        if len > MAX_PAYLOAD_SIZE {
            return Err(CourierError::WalCorruption(format!(
                "payload length {} exceeds maximum {}",
                len, MAX_PAYLOAD_SIZE
            )));
        }

        Ok((lsn, crc, len))
    }

    /// Verify the checksum and parse the payload
    pub(crate) fn from_parts(lsn: u64, crc: u32, payload: &[u8]) -> Result<Self> {
        let actual = Self::compute_crc(lsn, payload);
        if actual != crc {
            return Err(CourierError::WalCorruption(format!(
                "CRC mismatch for lsn {}: stored {:08x}, computed {:08x}",
                lsn, crc, actual
            )));
        }

        let operation = serde_json::from_slice(payload).map_err(|e| {
            CourierError::WalCorruption(format!("unparsable entry at lsn {}: {}", lsn, e))
        })?;

        Ok(Self { lsn, operation })
    }

    /// CRC32 over the LSN and the payload
    pub fn compute_crc(lsn: u64, payload: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&lsn.to_be_bytes());
        hasher.update(payload);
        hasher.finalize()
    }
}
