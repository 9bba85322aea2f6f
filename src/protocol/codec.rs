//! Protocol codec
//!
//! Encoding and decoding of message bodies.

use serde_json::Value;

use crate::error::{CourierError, Result};
use super::{CommandEnvelope, Response};

/// Decode an inbound body into a command envelope
///
/// Any valid JSON is accepted; invalid JSON is a `Protocol` error.
pub fn decode_command(body: &[u8]) -> Result<CommandEnvelope> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| CourierError::Protocol(format!("body is not valid JSON: {}", e)))?;
    Ok(CommandEnvelope::from_value(value))
}

/// Encode a response envelope
pub fn encode_response(response: &Response) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(response)?)
}

/// Decode a response envelope (client side)
pub fn decode_response(body: &[u8]) -> Result<Response> {
    serde_json::from_slice(body)
        .map_err(|e| CourierError::Protocol(format!("invalid response envelope: {}", e)))
}
