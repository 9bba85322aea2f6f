//! Tests for WAL Entry
//!
//! These tests verify:
//! - Frame layout (LSN | CRC | LEN | JSON payload)
//! - CRC coverage of LSN and payload
//! - Rejection of truncated, oversized and unparsable frames

use courierkv::error::CourierError;
use courierkv::wal::{Operation, WalEntry, HEADER_SIZE, MAX_PAYLOAD_SIZE};
use serde_json::{json, Value};

// =============================================================================
// Helper Functions
// =============================================================================

fn set(key: &str, value: Value) -> Operation {
    Operation::Set {
        key: key.to_string(),
        value,
    }
}

/// Build a frame around an arbitrary payload with a valid checksum
fn raw_frame(lsn: u64, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&lsn.to_be_bytes());
    frame.extend_from_slice(&WalEntry::compute_crc(lsn, payload).to_be_bytes());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

// =============================================================================
// Layout Tests
// =============================================================================

#[test]
fn test_frame_layout() {
    let entry = WalEntry::new(7, set("foo", json!("bar")));
    let bytes = entry.serialize().unwrap();

    let payload = br#"{"operation":"set","key":"foo","value":"bar"}"#;
    assert_eq!(bytes.len(), HEADER_SIZE + payload.len());
    assert_eq!(&bytes[0..8], &7u64.to_be_bytes());
    assert_eq!(&bytes[8..12], &WalEntry::compute_crc(7, payload).to_be_bytes());
    assert_eq!(&bytes[12..16], &(payload.len() as u32).to_be_bytes());
    assert_eq!(&bytes[16..], payload);
}

#[test]
fn test_all_operations_decode() {
    let operations = vec![
        set("a", json!({"nested": [1, 2, 3]})),
        set("falsy", json!(0)),
        Operation::Delete { key: "a".into() },
        Operation::Clear,
    ];

    for (i, operation) in operations.into_iter().enumerate() {
        let entry = WalEntry::new(i as u64 + 1, operation);
        let decoded = WalEntry::deserialize(&entry.serialize().unwrap()).unwrap();
        assert_eq!(decoded, entry);
    }
}

#[test]
fn test_clear_payload_has_no_key() {
    let bytes = WalEntry::new(1, Operation::Clear).serialize().unwrap();
    assert_eq!(&bytes[HEADER_SIZE..], br#"{"operation":"clear"}"#);
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_crc_covers_payload() {
    let mut bytes = WalEntry::new(1, set("k", json!("v"))).serialize().unwrap();
    let last = bytes.len() - 2;
    bytes[last] ^= 0x01;

    assert!(matches!(
        WalEntry::deserialize(&bytes),
        Err(CourierError::WalCorruption(_))
    ));
}

#[test]
fn test_crc_covers_lsn() {
    let mut bytes = WalEntry::new(1, set("k", json!("v"))).serialize().unwrap();
    bytes[7] = 2;

    assert!(matches!(
        WalEntry::deserialize(&bytes),
        Err(CourierError::WalCorruption(_))
    ));
}

#[test]
fn test_truncated_header() {
    let bytes = WalEntry::new(1, Operation::Clear).serialize().unwrap();
    assert!(matches!(
        WalEntry::deserialize(&bytes[..HEADER_SIZE - 1]),
        Err(CourierError::WalCorruption(_))
    ));
}

#[test]
fn test_truncated_payload() {
    let bytes = WalEntry::new(1, set("key", json!("value"))).serialize().unwrap();
    assert!(matches!(
        WalEntry::deserialize(&bytes[..bytes.len() - 3]),
        Err(CourierError::WalCorruption(_))
    ));
}

#[test]
fn test_oversized_length_rejected() {
    let mut bytes = WalEntry::new(1, Operation::Clear).serialize().unwrap();
    bytes[12..16].copy_from_slice(&(MAX_PAYLOAD_SIZE + 1).to_be_bytes());

    assert!(matches!(
        WalEntry::deserialize(&bytes),
        Err(CourierError::WalCorruption(_))
    ));
}

#[test]
fn test_valid_crc_invalid_json() {
    let frame = raw_frame(1, b"not json at all");
    assert!(matches!(
        WalEntry::deserialize(&frame),
        Err(CourierError::WalCorruption(_))
    ));
}

#[test]
fn test_unknown_operation_rejected() {
    let frame = raw_frame(1, br#"{"operation":"increment","key":"k"}"#);
    assert!(matches!(
        WalEntry::deserialize(&frame),
        Err(CourierError::WalCorruption(_))
    ));
}

#[test]
fn test_oversized_entry_not_written() {
    let huge = "x".repeat(MAX_PAYLOAD_SIZE as usize);
    let entry = WalEntry::new(1, set("big", json!(huge)));

    assert!(matches!(entry.serialize(), Err(CourierError::WalWrite(_))));
}
