//! Background snapshot timer

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Sender};

use crate::engine::Engine;
use crate::error::Result;

/// Writes a snapshot every `interval` on its own thread
///
/// Failures are logged and never retried before the next tick.
/// Dropping the handle stops the timer.
pub struct Snapshotter {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Snapshotter {
    /// Start the timer
    pub fn spawn(engine: Arc<Engine>, interval: Duration) -> Result<Self> {
        let (stop_tx, stop_rx) = channel::bounded::<()>(0);
        let ticker = channel::tick(interval);

        let handle = thread::Builder::new()
            .name("snapshotter".to_string())
            .spawn(move || {
                tracing::debug!(interval_secs = interval.as_secs(), "Snapshot timer started");
                loop {
                    crossbeam::select! {
                        recv(ticker) -> _ => match engine.snapshot() {
                            Ok(info) => tracing::info!(
                                path = %info.path.display(),
                                lsn = info.lsn,
                                keys = info.keys,
                                bytes = info.bytes,
                                "Snapshot written"
                            ),
                            Err(e) => tracing::error!(error = %e, "Snapshot failed"),
                        },
                        recv(stop_rx) -> _ => break,
                    }
                }
                tracing::debug!("Snapshot timer stopped");
            })?;

        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stop the timer and wait for an in-progress snapshot to finish
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Disconnecting the channel wakes the select
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Snapshot thread panicked");
            }
        }
    }
}

impl Drop for Snapshotter {
    fn drop(&mut self) {
        self.shutdown();
    }
}
