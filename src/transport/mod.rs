//! Transport Module
//!
//! Broker link between the outside world and the dispatcher.
//!
//! ## Architecture
//! - `Connector` opens a `Channel` (one logical broker connection)
//! - `ConnectionSupervisor` owns the link: connect with backoff, declare
//!   the topology, consume one message at a time, reconnect on failure
//! - Bindings: `AmqpConnector` (RabbitMQ), `MemoryBroker` (in-process) and
//!   `LineTransport` (text streams)
//!
//! ## Delivery Contract
//! At-least-once delivery with explicit acknowledgment and a prefetch of
//! one: the channel hands out the next message only after the previous
//! one was acked or nacked.

mod backoff;
mod supervisor;
mod amqp;
mod memory;
mod line;

pub use backoff::{Backoff, BackoffPolicy};
pub use supervisor::{ConnectionSupervisor, LinkState};
pub use amqp::AmqpConnector;
pub use memory::{MemoryBroker, MemoryConnector, Message};
pub use line::LineTransport;

use std::time::Duration;

use crate::config::Config;
use crate::error::Result;
use crate::protocol::COMMAND_TABLE;

/// A message handed to the consumer
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Identifies the delivery for ack/nack on the same channel
    pub tag: u64,

    /// Routing key the message was published with
    pub routing_key: String,

    /// Raw body
    pub body: Vec<u8>,

    /// Whether this message was delivered before and not acknowledged
    pub redelivered: bool,
}

/// Result of waiting for the next delivery
#[derive(Debug)]
pub enum Next {
    /// A message is ready
    Delivery(Delivery),

    /// Nothing arrived before the timeout
    Idle,

    /// The transport ended cleanly; no more messages will arrive
    Closed,
}

/// Queues, exchanges and bindings the consumer needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    /// Durable queue to consume from
    pub queue: String,

    /// Direct exchange inbound commands are published to
    pub income_exchange: String,

    /// Routing keys bound from `income_exchange` to `queue`
    pub routing_keys: Vec<String>,

    /// Direct exchange responses are published to
    pub outcome_exchange: String,

    /// Maximum unacknowledged deliveries per channel
    pub prefetch: usize,
}

impl Topology {
    /// Topology for the supported command set
    pub fn from_config(config: &Config) -> Self {
        Self {
            queue: config.queue_name.clone(),
            income_exchange: config.income_exchange.clone(),
            routing_keys: COMMAND_TABLE.iter().map(|(name, _)| name.to_string()).collect(),
            outcome_exchange: config.outcome_exchange.clone(),
            prefetch: 1,
        }
    }
}

/// One live broker connection
///
/// Link failures are reported as `CourierError::Connection`.
pub trait Channel: Send {
    /// Declare queue, exchanges and bindings, and start consuming
    fn declare(&mut self, topology: &Topology) -> Result<()>;

    /// Wait up to `timeout` for the next delivery
    fn next_delivery(&mut self, timeout: Duration) -> Result<Next>;

    /// Publish a message to an exchange
    fn publish(&mut self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<()>;

    /// Positively acknowledge a delivery
    fn ack(&mut self, tag: u64) -> Result<()>;

    /// Reject a delivery, requeueing it or dead-lettering it
    fn nack(&mut self, tag: u64, requeue: bool) -> Result<()>;
}

/// Opens channels to a broker
pub trait Connector: Send {
    /// Open a new connection
    ///
    /// `Connection` errors are retried by the supervisor; any other error
    /// is treated as a setup failure and ends the supervisor.
    fn connect(&mut self) -> Result<Box<dyn Channel>>;

    /// Human-readable endpoint for logs
    fn endpoint(&self) -> String {
        "broker".to_string()
    }
}
