//! Command Dispatcher
//!
//! Turns one inbound delivery into one store operation, one published
//! response and exactly one acknowledgment.
//!
//! ## Per-message lifecycle
//! `received → validated → applied → acknowledged`
//!
//! Every per-command error becomes a response payload. Only transport
//! failures escape, so a bad command never stops the consume loop.

use std::sync::Arc;

use crate::config::Config;
use crate::engine::Engine;
use crate::error::{CourierError, Result};
use crate::protocol::{decode_command, encode_response, Command, CommandType, Response};
use crate::transport::{Channel, Delivery};

/// Acknowledgment decision for a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Handled, including validation and not-found outcomes
    Ack,

    /// The handler failed; requeue or dead-letter
    Nack { requeue: bool },
}

/// Response and acknowledgment decided for one message
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub response: Response,
    pub disposition: Disposition,
}

impl Outcome {
    fn ack(response: Response) -> Self {
        Self {
            response,
            disposition: Disposition::Ack,
        }
    }
}

/// Routes deliveries to the engine
pub struct Dispatcher {
    engine: Arc<Engine>,
    outcome_exchange: String,
    response_routing_key: String,
    requeue_on_failure: bool,
}

impl Dispatcher {
    pub fn new(engine: Arc<Engine>, config: &Config) -> Self {
        Self {
            engine,
            outcome_exchange: config.outcome_exchange.clone(),
            response_routing_key: config.response_routing_key.clone(),
            requeue_on_failure: config.requeue_on_failure,
        }
    }

    /// Decide the response and disposition for one message
    ///
    /// Mutations are appended to the WAL (and synced per the sync strategy)
    /// before this returns.
    pub fn handle(&self, routing_key: &str, body: &[u8]) -> Outcome {
        let envelope = match decode_command(body) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(routing_key, error = %e, "Rejecting malformed body");
                return Outcome::ack(Response::invalid_format());
            }
        };

        let kind = match CommandType::from_routing_key(routing_key) {
            Some(kind) => kind,
            None => {
                tracing::info!("Event {} handler is not specified", routing_key);
                return Outcome::ack(Response::unsupported(routing_key));
            }
        };

        let command = match Command::from_envelope(kind, envelope) {
            Ok(command) => command,
            Err(e) => {
                tracing::debug!(routing_key, error = %e, "Invalid command");
                return Outcome::ack(Response::invalid_key(kind));
            }
        };

        match self.engine.execute(command) {
            Ok(response) => Outcome::ack(response),
            Err(CourierError::KeyNotFound) => Outcome::ack(Response::not_found()),
            Err(CourierError::Validation(_)) => Outcome::ack(Response::invalid_key(kind)),
            Err(e) => {
                tracing::error!(routing_key, error = %e, "Command failed");
                Outcome {
                    response: Response::failed(kind),
                    disposition: Disposition::Nack {
                        requeue: self.requeue_on_failure,
                    },
                }
            }
        }
    }

    /// Handle a delivery, publish its response, then ack or nack it once
    ///
    /// Errors are transport failures only.
    pub fn process(&self, channel: &mut dyn Channel, delivery: Delivery) -> Result<Disposition> {
        tracing::trace!(
            tag = delivery.tag,
            routing_key = %delivery.routing_key,
            redelivered = delivery.redelivered,
            "Received"
        );

        let outcome = self.handle(&delivery.routing_key, &delivery.body);

        match encode_response(&outcome.response) {
            Ok(body) => {
                channel.publish(&self.outcome_exchange, &self.response_routing_key, &body)?
            }
            Err(e) => tracing::error!(tag = delivery.tag, error = %e, "Cannot encode response"),
        }

        match outcome.disposition {
            Disposition::Ack => channel.ack(delivery.tag)?,
            Disposition::Nack { requeue } => {
                tracing::warn!(
                    tag = delivery.tag,
                    routing_key = %delivery.routing_key,
                    requeue,
                    "Negatively acknowledging message"
                );
                channel.nack(delivery.tag, requeue)?
            }
        }

        Ok(outcome.disposition)
    }

    /// Get the engine
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }
}
