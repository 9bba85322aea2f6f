//! CourierKV Server Binary
//!
//! Consumes commands from an AMQP broker (default) or from stdin, and
//! publishes responses back over the same transport.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use courierkv::config::WalSyncStrategy;
use courierkv::snapshot::Snapshotter;
use courierkv::transport::{
    AmqpConnector, BackoffPolicy, ConnectionSupervisor, Connector, LineTransport,
};
use courierkv::{Config, Dispatcher, Engine};
use tracing_subscriber::{fmt, EnvFilter};

/// CourierKV Server
#[derive(Parser, Debug)]
#[command(name = "courierkv-server")]
#[command(about = "Durable message-driven key-value store")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, env = "COURIERKV_DATA_DIR", default_value = "./courierkv_data")]
    data_dir: PathBuf,

    /// Snapshot directory (defaults to {data-dir}/snapshots)
    #[arg(long, env = "COURIERKV_SNAPSHOT_DIR")]
    snapshot_dir: Option<PathBuf>,

    /// Minutes between snapshots
    #[arg(short = 'i', long, env = "SNAPSHOT_INTERVAL_MINUTES", default_value = "5")]
    snapshot_interval_minutes: u64,

    /// Recover from the newest snapshot plus the WAL tail
    #[arg(long, env = "COURIERKV_RECOVER_FROM_SNAPSHOT")]
    recover_from_snapshot: bool,

    /// fsync the WAL every N entries instead of every entry.
    /// Messages can then be acked before their entry is on disk.
    #[arg(long, env = "COURIERKV_WAL_SYNC_EVERY")]
    wal_sync_every: Option<usize>,

    /// Where commands come from
    #[arg(short, long, value_enum, env = "COURIERKV_TRANSPORT", default_value = "amqp")]
    transport: TransportKind,

    /// Broker host
    #[arg(long, env = "RMQ_HOST", default_value = "localhost")]
    rmq_host: String,

    /// Broker port
    #[arg(long, env = "RMQ_PORT", default_value = "5672")]
    rmq_port: u16,

    /// Broker user
    #[arg(long, env = "RMQ_USERNAME", default_value = "guest")]
    rmq_username: String,

    /// Broker password
    #[arg(long, env = "RMQ_PASSWORD", default_value = "guest", hide_env_values = true)]
    rmq_password: String,

    /// Queue commands are consumed from
    #[arg(short, long, env = "COURIERKV_QUEUE", default_value = "courierkv")]
    queue: String,

    /// Exchange carrying inbound commands
    #[arg(long, env = "COURIERKV_INCOME_EXCHANGE", default_value = "courierkv.income")]
    income_exchange: String,

    /// Exchange responses are published to
    #[arg(long, env = "COURIERKV_OUTCOME_EXCHANGE", default_value = "courierkv.outcome")]
    outcome_exchange: String,

    /// Initial reconnect delay in milliseconds
    #[arg(long, env = "COURIERKV_BACKOFF_INITIAL_MS", default_value = "1000")]
    backoff_initial_ms: u64,

    /// Maximum reconnect delay in milliseconds
    #[arg(long, env = "COURIERKV_BACKOFF_MAX_MS", default_value = "60000")]
    backoff_max_ms: u64,

    /// Requeue messages whose handler failed instead of dead-lettering them
    #[arg(long, env = "COURIERKV_REQUEUE_ON_FAILURE")]
    requeue_on_failure: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TransportKind {
    /// AMQP 0-9-1 broker
    Amqp,
    /// `<routing-key> <json>` lines on stdin, responses on stdout
    Stdio,
}

fn main() {
    // Logs go to stderr; stdout may carry responses
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,courierkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("CourierKV Server v{}", courierkv::VERSION);
    tracing::info!("Data directory: {}", args.data_dir.display());
    tracing::info!("Queue: {}", args.queue);

    let mut builder = Config::builder()
        .data_dir(&args.data_dir)
        .broker(&args.rmq_host, args.rmq_port)
        .broker_credentials(&args.rmq_username, &args.rmq_password)
        .snapshot_interval_minutes(args.snapshot_interval_minutes)
        .recover_from_snapshot(args.recover_from_snapshot)
        .queue_name(&args.queue)
        .income_exchange(&args.income_exchange)
        .outcome_exchange(&args.outcome_exchange)
        .backoff(BackoffPolicy::new(
            Duration::from_millis(args.backoff_initial_ms),
            Duration::from_millis(args.backoff_max_ms),
            2,
        ))
        .requeue_on_failure(args.requeue_on_failure);
    if let Some(dir) = &args.snapshot_dir {
        builder = builder.snapshot_dir(dir);
    }
    if let Some(count) = args.wal_sync_every {
        builder = builder.wal_sync_strategy(WalSyncStrategy::EveryNEntries { count });
    }
    let config = builder.build();

    if !config.wal_sync_strategy.syncs_every_write() {
        tracing::warn!(
            strategy = ?config.wal_sync_strategy,
            "WAL is synced in batches; acknowledged messages can be lost on power failure"
        );
    }

    // Open engine
    let engine = match Engine::open(config.clone()) {
        Ok(e) => Arc::new(e),
        Err(e) => {
            tracing::error!("Failed to open engine: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!("Engine initialized successfully");

    let snapshotter = match Snapshotter::spawn(Arc::clone(&engine), config.snapshot_interval) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to start snapshot timer: {}", e);
            std::process::exit(1);
        }
    };

    let dispatcher = Dispatcher::new(Arc::clone(&engine), &config);
    let result = match args.transport {
        TransportKind::Amqp => serve(AmqpConnector::from_config(&config), dispatcher, &config),
        TransportKind::Stdio => serve(LineTransport::stdio(), dispatcher, &config),
    };

    snapshotter.stop();
    if let Err(e) = engine.sync() {
        tracing::error!("Failed to sync WAL: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = result {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Server stopped");
}

/// Run the consumer until the transport closes or Ctrl+C
fn serve<C: Connector>(connector: C, dispatcher: Dispatcher, config: &Config) -> courierkv::Result<()> {
    let mut supervisor = ConnectionSupervisor::new(connector, dispatcher, config);

    let running = supervisor.running_flag();
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::info!("Received Ctrl+C, initiating shutdown...");
        running.store(false, Ordering::SeqCst);
    }) {
        tracing::warn!("Cannot install Ctrl+C handler: {}", e);
    }

    let result = supervisor.run();
    tracing::info!(processed = supervisor.processed(), "Consumer stopped");
    result
}
