//! # CourierKV
//!
//! A durable, message-driven key-value store with:
//! - Write-Ahead Logging (WAL) for durability
//! - Crash recovery by WAL replay (optionally from a snapshot checkpoint)
//! - Periodic zstd-compressed snapshots
//! - Commands consumed from a broker queue, one response per command
//! - Reconnect with exponential backoff
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                Connection Supervisor                         │
//! │          (connect / consume / reconnect w/ backoff)          │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ one delivery at a time
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                 Command Dispatcher                           │
//! │        (parse → route → validate → apply → ack/nack)         │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │     WAL     │          │    Store    │
//!   │  (Append)   │          │  (RwLock)   │
//!   └─────────────┘          └──────┬──────┘
//!                                   │
//!                                   ▼
//!                           ┌─────────────┐
//!                           │  Snapshots  │
//!                           │   (zstd)    │
//!                           └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod store;
pub mod wal;
pub mod snapshot;
pub mod protocol;
pub mod engine;
pub mod dispatcher;
pub mod transport;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{CourierError, Result};
pub use config::Config;
pub use engine::Engine;
pub use dispatcher::{Dispatcher, Disposition, Outcome};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of CourierKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
