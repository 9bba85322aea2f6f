//! Response definitions
//!
//! Represents responses published back to clients.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::CommandType;

/// Outbound envelope: `{"response": <payload>}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "response")]
    pub payload: Value,
}

impl Response {
    pub fn new(payload: Value) -> Self {
        Self { payload }
    }

    /// Successful set: the stored `{key: value}` pair
    pub fn stored(pair: Value) -> Self {
        Self::new(pair)
    }

    /// Successful get: the value itself
    pub fn value(value: Value) -> Self {
        Self::new(value)
    }

    /// Successful delete
    pub fn deleted(key: &str) -> Self {
        Self::text(format!("Key {} successfully deleted", key))
    }

    /// Successful clear
    pub fn cleared() -> Self {
        Self::text("All keys successfully deleted")
    }

    /// Key absent on get/delete
    pub fn not_found() -> Self {
        Self::text("Key not found")
    }

    /// Body was not JSON
    pub fn invalid_format() -> Self {
        Self::text("Message format is not valid")
    }

    /// Missing, empty or non-string key
    pub fn invalid_key(kind: CommandType) -> Self {
        match kind {
            CommandType::Set => Self::text("Invalid key/value for element"),
            _ => Self::text("Invalid key of element"),
        }
    }

    /// Routing key outside the command table
    pub fn unsupported(routing_key: &str) -> Self {
        Self::text(format!("Event {} handler is not specified", routing_key))
    }

    /// The operation could not be made durable
    pub fn failed(kind: CommandType) -> Self {
        match kind {
            CommandType::Set => Self::text("Error on setting key"),
            CommandType::Delete => Self::text("Error on deleting key"),
            CommandType::Clear => Self::text("Error on cleaning DB"),
            CommandType::Get => Self::text("Error on getting key"),
        }
    }

    fn text(message: impl Into<String>) -> Self {
        Self::new(Value::String(message.into()))
    }
}
