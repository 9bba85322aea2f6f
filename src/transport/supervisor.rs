//! Connection Supervisor
//!
//! Keeps the broker link alive and feeds deliveries to the dispatcher.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use super::{Backoff, Channel, Connector, Next, Topology};

/// Link state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// How a consume session ended
enum SessionEnd {
    /// Transport reported a clean end of input
    Closed,

    /// Shutdown was requested
    Shutdown,
}

/// Owns the transport link
///
/// `disconnected → connecting → connected → (error) → reconnecting → connecting → …`
///
/// One `Backoff` drives both initial connect retries and reconnects after a
/// runtime failure. It resets after every successful connect.
pub struct ConnectionSupervisor<C: Connector> {
    connector: C,
    dispatcher: Dispatcher,
    topology: Topology,
    backoff: Backoff,
    poll_interval: Duration,
    running: Arc<AtomicBool>,
    state: LinkState,
    connects: u64,
    processed: u64,
}

impl<C: Connector> ConnectionSupervisor<C> {
    pub fn new(connector: C, dispatcher: Dispatcher, config: &Config) -> Self {
        Self {
            connector,
            dispatcher,
            topology: Topology::from_config(config),
            backoff: config.backoff.start(),
            poll_interval: config.poll_interval,
            running: Arc::new(AtomicBool::new(true)),
            state: LinkState::Disconnected,
            connects: 0,
            processed: 0,
        }
    }

    /// Flag that keeps `run` going; store `false` to stop it
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Run until the transport closes or shutdown is requested
    ///
    /// Connection failures are retried forever. Only a connector error that
    /// is not a connection error ends the loop with `Err`.
    pub fn run(&mut self) -> Result<()> {
        while self.is_running() {
            let mut channel = match self.establish()? {
                Some(channel) => channel,
                None => continue,
            };

            match self.consume(channel.as_mut()) {
                Ok(SessionEnd::Closed) => {
                    tracing::info!(endpoint = %self.connector.endpoint(), "Transport closed");
                    break;
                }
                Ok(SessionEnd::Shutdown) => break,
                Err(e) => {
                    drop(channel);
                    self.transition(LinkState::Reconnecting);
                    let delay = self.backoff.next_delay();
                    tracing::warn!(
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Lost connection to broker, reconnecting"
                    );
                    self.wait(delay);
                }
            }
        }

        self.transition(LinkState::Disconnected);
        Ok(())
    }

    /// Connect and declare; `None` means a retry wait happened
    fn establish(&mut self) -> Result<Option<Box<dyn Channel>>> {
        self.transition(LinkState::Connecting);

        let attempt = self
            .connector
            .connect()
            .and_then(|mut channel| channel.declare(&self.topology).map(|_| channel));

        match attempt {
            Ok(channel) => {
                self.backoff.reset();
                self.connects += 1;
                self.transition(LinkState::Connected);
                tracing::info!(
                    endpoint = %self.connector.endpoint(),
                    queue = %self.topology.queue,
                    "Consuming"
                );
                Ok(Some(channel))
            }
            Err(e) if e.is_connection() => {
                let delay = self.backoff.next_delay();
                tracing::warn!(
                    endpoint = %self.connector.endpoint(),
                    attempt = self.backoff.attempts(),
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "Problem connecting to broker"
                );
                self.wait(delay);
                Ok(None)
            }
            Err(e) => {
                tracing::error!(error = %e, "Broker setup failed");
                self.transition(LinkState::Disconnected);
                Err(e)
            }
        }
    }

    /// Process deliveries one at a time until the session ends
    fn consume(&mut self, channel: &mut dyn Channel) -> Result<SessionEnd> {
        loop {
            if !self.is_running() {
                return Ok(SessionEnd::Shutdown);
            }

            match channel.next_delivery(self.poll_interval)? {
                Next::Delivery(delivery) => {
                    self.dispatcher.process(channel, delivery)?;
                    self.processed += 1;
                }
                Next::Idle => {}
                Next::Closed => return Ok(SessionEnd::Closed),
            }
        }
    }

    /// Sleep for `delay`, waking early on shutdown
    fn wait(&self, delay: Duration) {
        let deadline = Instant::now() + delay;
        while self.is_running() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(self.poll_interval));
        }
    }

    fn transition(&mut self, next: LinkState) {
        if self.state != next {
            tracing::debug!(from = ?self.state, to = ?next, "Link state");
            self.state = next;
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current link state
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Successful connects so far
    pub fn connects(&self) -> u64 {
        self.connects
    }

    /// Messages fully processed so far
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Get the dispatcher
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}
