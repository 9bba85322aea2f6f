//! Configuration for CourierKV
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CourierError, Result};
use crate::transport::BackoffPolicy;

/// Main configuration for a CourierKV instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for the WAL (and snapshots unless overridden)
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── wal.log          (write-ahead log)
    ///     └── snapshots/       (RDB-{unix_seconds} files)
    pub data_dir: PathBuf,

    /// Snapshot directory override
    pub snapshot_dir: Option<PathBuf>,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync WAL
    pub wal_sync_strategy: WalSyncStrategy,

    // -------------------------------------------------------------------------
    // Snapshot / Recovery Configuration
    // -------------------------------------------------------------------------
    /// Time between background snapshots
    pub snapshot_interval: Duration,

    /// zstd compression level for snapshots
    pub snapshot_compression_level: i32,

    /// Load the newest snapshot and replay only the WAL tail after it
    pub recover_from_snapshot: bool,

    // -------------------------------------------------------------------------
    // Broker Configuration
    // -------------------------------------------------------------------------
    /// AMQP broker host
    pub broker_host: String,

    /// AMQP broker port
    pub broker_port: u16,

    /// AMQP user (PLAIN auth)
    pub broker_username: String,

    /// AMQP password (PLAIN auth)
    pub broker_password: String,

    // -------------------------------------------------------------------------
    // Transport Configuration
    // -------------------------------------------------------------------------
    /// Durable queue commands are consumed from
    pub queue_name: String,

    /// Exchange carrying inbound commands (bound per routing key)
    pub income_exchange: String,

    /// Exchange responses are published to
    pub outcome_exchange: String,

    /// Routing key used for every response
    pub response_routing_key: String,

    /// Retry schedule for connect and reconnect
    pub backoff: BackoffPolicy,

    /// Requeue messages whose handler failed instead of dead-lettering them
    pub requeue_on_failure: bool,

    /// How long an idle consumer waits before rechecking for shutdown
    pub poll_interval: Duration,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N uncommitted entries (balanced durability/performance)
    ///
    /// Relaxes durability before ack: up to `count - 1` acknowledged
    /// mutations can be lost on power failure.
    EveryNEntries { count: usize },
}

impl WalSyncStrategy {
    /// Whether every successful append is already on disk
    pub fn syncs_every_write(&self) -> bool {
        matches!(
            self,
            WalSyncStrategy::EveryWrite | WalSyncStrategy::EveryNEntries { count: 1 }
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./courierkv_data"),
            snapshot_dir: None,
            wal_sync_strategy: WalSyncStrategy::EveryWrite,
            snapshot_interval: Duration::from_secs(5 * 60),
            snapshot_compression_level: 3,
            recover_from_snapshot: false,
            broker_host: "localhost".to_string(),
            broker_port: 5672,
            broker_username: "guest".to_string(),
            broker_password: "guest".to_string(),
            queue_name: "courierkv".to_string(),
            income_exchange: "courierkv.income".to_string(),
            outcome_exchange: "courierkv.outcome".to_string(),
            response_routing_key: "response".to_string(),
            backoff: BackoffPolicy::default(),
            requeue_on_failure: false,
            poll_interval: Duration::from_millis(250),
        }
    }
}

impl Config {
    const WAL_FILENAME: &'static str = "wal.log";
    const SNAPSHOT_DIR: &'static str = "snapshots";

    /// Longest accepted snapshot interval (one year)
    pub const MAX_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Path of the write-ahead log
    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(Self::WAL_FILENAME)
    }

    /// Directory snapshots are written to
    pub fn snapshot_dir(&self) -> PathBuf {
        self.snapshot_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join(Self::SNAPSHOT_DIR))
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.snapshot_interval.is_zero() {
            return Err(CourierError::Config(
                "snapshot interval must be greater than zero".to_string(),
            ));
        }
        if self.snapshot_interval > Self::MAX_SNAPSHOT_INTERVAL {
            return Err(CourierError::Config(format!(
                "snapshot interval must be at most {} minutes",
                Self::MAX_SNAPSHOT_INTERVAL.as_secs() / 60
            )));
        }

        for (name, value) in [
            ("broker host", &self.broker_host),
            ("queue name", &self.queue_name),
            ("income exchange", &self.income_exchange),
            ("outcome exchange", &self.outcome_exchange),
            ("response routing key", &self.response_routing_key),
        ] {
            if value.trim().is_empty() {
                return Err(CourierError::Config(format!("{} must not be empty", name)));
            }
        }

        if self.broker_port == 0 {
            return Err(CourierError::Config("broker port must not be 0".to_string()));
        }

        if let WalSyncStrategy::EveryNEntries { count: 0 } = self.wal_sync_strategy {
            return Err(CourierError::Config(
                "WAL sync batch size must be at least 1".to_string(),
            ));
        }

        self.backoff.validate()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for the WAL)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Write snapshots somewhere other than `{data_dir}/snapshots`
    pub fn snapshot_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.snapshot_dir = Some(path.into());
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the snapshot interval in minutes
    ///
    /// An interval too large to represent is kept as `Duration::MAX` and
    /// rejected by `validate`.
    pub fn snapshot_interval_minutes(mut self, minutes: u64) -> Self {
        self.config.snapshot_interval = minutes
            .checked_mul(60)
            .map_or(Duration::MAX, Duration::from_secs);
        self
    }

    /// Set the snapshot interval directly
    pub fn snapshot_interval(mut self, interval: Duration) -> Self {
        self.config.snapshot_interval = interval;
        self
    }

    /// Set the zstd level used for snapshots
    pub fn snapshot_compression_level(mut self, level: i32) -> Self {
        self.config.snapshot_compression_level = level;
        self
    }

    /// Recover from the newest snapshot plus the WAL tail
    pub fn recover_from_snapshot(mut self, enabled: bool) -> Self {
        self.config.recover_from_snapshot = enabled;
        self
    }

    /// Set the broker address
    pub fn broker(mut self, host: impl Into<String>, port: u16) -> Self {
        self.config.broker_host = host.into();
        self.config.broker_port = port;
        self
    }

    /// Set the broker credentials
    pub fn broker_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.config.broker_username = username.into();
        self.config.broker_password = password.into();
        self
    }

    /// Set the inbound queue name
    pub fn queue_name(mut self, name: impl Into<String>) -> Self {
        self.config.queue_name = name.into();
        self
    }

    /// Set the inbound exchange name
    pub fn income_exchange(mut self, name: impl Into<String>) -> Self {
        self.config.income_exchange = name.into();
        self
    }

    /// Set the outbound exchange name
    pub fn outcome_exchange(mut self, name: impl Into<String>) -> Self {
        self.config.outcome_exchange = name.into();
        self
    }

    /// Set the routing key responses are published with
    pub fn response_routing_key(mut self, key: impl Into<String>) -> Self {
        self.config.response_routing_key = key.into();
        self
    }

    /// Set the connect/reconnect backoff policy
    pub fn backoff(mut self, policy: BackoffPolicy) -> Self {
        self.config.backoff = policy;
        self
    }

    /// Requeue failed messages instead of dead-lettering them
    pub fn requeue_on_failure(mut self, requeue: bool) -> Self {
        self.config.requeue_on_failure = requeue;
        self
    }

    /// Set the idle poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
