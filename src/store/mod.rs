//! Store Module
//!
//! In-memory map from string keys to JSON values.
//!
//! ## Responsibilities
//! - Pure mutation primitives (set/delete/get/clear), no I/O
//! - Key validation before any mutation
//! - Track the LSN of the last applied WAL entry for checkpointing
//!
//! ## Data Structure Choice
//! BTreeMap wrapped in a parking_lot RwLock:
//! - Dispatch is single-writer, the snapshot timer is the only other reader
//! - Ordered keys give deterministic snapshot output

mod table;

pub use table::Store;
pub(crate) use table::validate_key;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A consistent copy of the Store content and the WAL position it reflects
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreImage {
    /// LSN of the last WAL entry applied (0 = nothing applied)
    pub lsn: u64,

    /// Full key/value content
    pub data: BTreeMap<String, Value>,
}
