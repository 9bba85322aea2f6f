//! Store implementation
//!
//! BTreeMap-based store with RwLock for the snapshot reader.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde_json::{Map, Value};

use super::StoreImage;
use crate::error::{CourierError, Result};
use crate::wal::{Operation, WalEntry};

/// In-memory key/value state
pub struct Store {
    inner: RwLock<StoreImage>,
}

impl Store {
    /// Create a new empty Store
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreImage::default()),
        }
    }

    /// Create a Store pre-populated from a snapshot image
    pub fn from_image(image: StoreImage) -> Self {
        Self {
            inner: RwLock::new(image),
        }
    }

    /// Insert or overwrite a key, returning the stored `{key: value}` pair
    pub fn apply_set(&self, key: &str, value: Value) -> Result<Value> {
        validate_key(key)?;
        let mut inner = self.inner.write();
        Ok(set_locked(&mut inner.data, key, value))
    }

    /// Remove a key; `KeyNotFound` if it is absent
    pub fn apply_delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        let mut inner = self.inner.write();
        delete_locked(&mut inner.data, key)
    }

    /// Get a value by key
    ///
    /// Presence is decided by key existence, so stored `0`, `""`, `false`
    /// and `null` are returned as values.
    pub fn apply_get(&self, key: &str) -> Result<Value> {
        validate_key(key)?;
        self.inner
            .read()
            .data
            .get(key)
            .cloned()
            .ok_or(CourierError::KeyNotFound)
    }

    /// Remove every key. Always succeeds.
    pub fn apply_clear(&self) {
        self.inner.write().data.clear();
    }

    /// Apply a logged operation and record its LSN under a single write lock
    ///
    /// Used by the engine after a successful append and by recovery replay.
    /// Snapshots therefore never see data without its matching LSN.
    /// A logged delete of an absent key is a no-op.
    pub fn apply_entry(&self, entry: &WalEntry) -> Result<Value> {
        let mut inner = self.inner.write();
        let result = match &entry.operation {
            Operation::Set { key, value } => {
                validate_key(key)?;
                set_locked(&mut inner.data, key, value.clone())
            }
            Operation::Delete { key } => {
                validate_key(key)?;
                inner.data.remove(key.as_str());
                Value::Null
            }
            Operation::Clear => {
                inner.data.clear();
                Value::Null
            }
        };
        inner.lsn = entry.lsn;
        Ok(result)
    }

    /// Check whether a key exists
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.read().data.contains_key(key)
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.inner.read().data.len()
    }

    /// Check if the store has no keys
    pub fn is_empty(&self) -> bool {
        self.inner.read().data.is_empty()
    }

    /// LSN of the last applied WAL entry
    pub fn applied_lsn(&self) -> u64 {
        self.inner.read().lsn
    }

    /// Copy the full content together with its LSN
    pub fn image(&self) -> StoreImage {
        self.inner.read().clone()
    }

    /// Content as a JSON object
    pub fn to_json(&self) -> Value {
        let inner = self.inner.read();
        Value::Object(
            inner
                .data
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<Map<String, Value>>(),
        )
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

/// Keys must be non-empty
pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CourierError::Validation("key must be a non-empty string".to_string()));
    }
    Ok(())
}

fn set_locked(data: &mut BTreeMap<String, Value>, key: &str, value: Value) -> Value {
    let mut pair = Map::with_capacity(1);
    pair.insert(key.to_string(), value.clone());
    data.insert(key.to_string(), value);
    Value::Object(pair)
}

fn delete_locked(data: &mut BTreeMap<String, Value>, key: &str) -> Result<()> {
    data.remove(key).map(|_| ()).ok_or(CourierError::KeyNotFound)
}
