//! Command definitions
//!
//! Represents commands from clients.

use serde_json::Value;

use crate::error::{CourierError, Result};

/// Command types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandType {
    Set,
    Get,
    Delete,
    Clear,
}

/// Routing key → command type. The complete set of supported operations.
pub const COMMAND_TABLE: [(&str, CommandType); 4] = [
    ("set", CommandType::Set),
    ("get", CommandType::Get),
    ("delete", CommandType::Delete),
    ("clear", CommandType::Clear),
];

impl CommandType {
    /// Look up the command bound to a routing key
    pub fn from_routing_key(routing_key: &str) -> Option<Self> {
        COMMAND_TABLE
            .iter()
            .find(|(name, _)| *name == routing_key)
            .map(|(_, kind)| *kind)
    }

    /// Routing key this command is consumed from
    pub fn routing_key(self) -> &'static str {
        COMMAND_TABLE
            .iter()
            .find(|(_, kind)| *kind == self)
            .map(|(name, _)| *name)
            .unwrap_or_default()
    }

    /// Whether the command goes through the WAL
    pub fn is_mutation(self) -> bool {
        !matches!(self, CommandType::Get)
    }
}

/// Inbound message body
///
/// Fields are kept as raw JSON so that a non-string key can be reported
/// as a validation error instead of a parse error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandEnvelope {
    pub key: Option<Value>,
    pub value: Option<Value>,
}

impl CommandEnvelope {
    /// Build from a parsed body. A body that is not an object has no fields.
    pub fn from_value(body: Value) -> Self {
        match body {
            Value::Object(mut map) => Self {
                key: map.remove("key"),
                value: map.remove("value"),
            },
            _ => Self::default(),
        }
    }

    /// The key as a non-empty string
    pub fn key(&self) -> Result<&str> {
        match &self.key {
            Some(Value::String(key)) if !key.is_empty() => Ok(key),
            Some(Value::String(_)) => Err(CourierError::Validation("key is empty".to_string())),
            Some(other) => Err(CourierError::Validation(format!(
                "key must be a string, got {}",
                other
            ))),
            None => Err(CourierError::Validation("key is missing".to_string())),
        }
    }
}

/// A validated command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Insert or overwrite a key
    Set { key: String, value: Value },

    /// Get a value by key
    Get { key: String },

    /// Delete a key
    Delete { key: String },

    /// Remove every key
    Clear,
}

impl Command {
    /// Validate an envelope for the given command type
    ///
    /// A `set` without a value stores `null`. `clear` ignores the body.
    pub fn from_envelope(kind: CommandType, envelope: CommandEnvelope) -> Result<Self> {
        Ok(match kind {
            CommandType::Set => Command::Set {
                key: envelope.key()?.to_string(),
                value: envelope.value.unwrap_or(Value::Null),
            },
            CommandType::Get => Command::Get {
                key: envelope.key()?.to_string(),
            },
            CommandType::Delete => Command::Delete {
                key: envelope.key()?.to_string(),
            },
            CommandType::Clear => Command::Clear,
        })
    }
}
