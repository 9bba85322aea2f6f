//! Tests for the Store
//!
//! These tests verify:
//! - set/get/delete/clear semantics
//! - Falsy values are present values
//! - Key validation
//! - Logged entries carry their LSN into the Store

use courierkv::error::CourierError;
use courierkv::store::{Store, StoreImage};
use courierkv::wal::{Operation, WalEntry};
use serde_json::{json, Value};

// =============================================================================
// Basic Operations
// =============================================================================

#[test]
fn test_set_returns_pair() {
    let store = Store::new();
    let pair = store.apply_set("foo", json!("bar")).unwrap();
    assert_eq!(pair, json!({"foo": "bar"}));
    assert_eq!(store.apply_get("foo").unwrap(), json!("bar"));
}

#[test]
fn test_set_overwrites() {
    let store = Store::new();
    store.apply_set("k", json!(1)).unwrap();
    store.apply_set("k", json!([1, 2])).unwrap();

    assert_eq!(store.apply_get("k").unwrap(), json!([1, 2]));
    assert_eq!(store.len(), 1);
}

#[test]
fn test_get_missing() {
    let store = Store::new();
    assert!(matches!(store.apply_get("nope"), Err(CourierError::KeyNotFound)));
}

#[test]
fn test_delete() {
    let store = Store::new();
    store.apply_set("k", json!("v")).unwrap();

    store.apply_delete("k").unwrap();
    assert!(!store.contains_key("k"));
    assert!(matches!(store.apply_delete("k"), Err(CourierError::KeyNotFound)));
}

#[test]
fn test_clear() {
    let store = Store::new();
    for i in 0..10 {
        store.apply_set(&format!("k{}", i), json!(i)).unwrap();
    }

    store.apply_clear();
    assert!(store.is_empty());

    // Clearing an empty store is fine
    store.apply_clear();
    assert!(store.is_empty());
}

// =============================================================================
// Value Edge Cases
// =============================================================================

#[test]
fn test_falsy_values_are_present() {
    let store = Store::new();
    let values = [json!(0), json!(""), json!(false), Value::Null, json!([]), json!({})];

    for (i, value) in values.iter().enumerate() {
        let key = format!("k{}", i);
        store.apply_set(&key, value.clone()).unwrap();
        assert!(store.contains_key(&key));
        assert_eq!(&store.apply_get(&key).unwrap(), value);
    }
}

#[test]
fn test_empty_key_rejected() {
    let store = Store::new();
    assert!(matches!(store.apply_set("", json!(1)), Err(CourierError::Validation(_))));
    assert!(matches!(store.apply_get(""), Err(CourierError::Validation(_))));
    assert!(matches!(store.apply_delete(""), Err(CourierError::Validation(_))));
    assert!(store.is_empty());
}

#[test]
fn test_unicode_keys() {
    let store = Store::new();
    store.apply_set("ключ", json!("значение")).unwrap();
    store.apply_set("🔑", json!(1)).unwrap();

    assert_eq!(store.apply_get("ключ").unwrap(), json!("значение"));
    assert_eq!(store.to_json(), json!({"ключ": "значение", "🔑": 1}));
}

// =============================================================================
// Logged Entries
// =============================================================================

#[test]
fn test_apply_entry_tracks_lsn() {
    let store = Store::new();
    assert_eq!(store.applied_lsn(), 0);

    store
        .apply_entry(&WalEntry::new(
            1,
            Operation::Set {
                key: "a".into(),
                value: json!(1),
            },
        ))
        .unwrap();
    store
        .apply_entry(&WalEntry::new(2, Operation::Delete { key: "missing".into() }))
        .unwrap();

    assert_eq!(store.applied_lsn(), 2);
    assert_eq!(store.image().lsn, 2);
    assert_eq!(store.to_json(), json!({"a": 1}));
}

#[test]
fn test_apply_entry_rejects_empty_key() {
    let store = Store::new();
    let entry = WalEntry::new(
        1,
        Operation::Set {
            key: String::new(),
            value: json!(1),
        },
    );
    assert!(store.apply_entry(&entry).is_err());
    assert_eq!(store.applied_lsn(), 0);
}

#[test]
fn test_from_image() {
    let mut image = StoreImage::default();
    image.lsn = 9;
    image.data.insert("x".into(), json!({"y": 2}));

    let store = Store::from_image(image.clone());
    assert_eq!(store.applied_lsn(), 9);
    assert_eq!(store.image(), image);
}
