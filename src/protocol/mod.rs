//! Protocol Module
//!
//! Defines the message contract between clients and the dispatcher.
//!
//! ## Inbound
//! The operation travels out of band as the routing key; the body is a
//! JSON command envelope:
//! ```text
//! routing key: set     body: {"key": "foo", "value": "bar"}
//! routing key: get     body: {"key": "foo"}
//! routing key: delete  body: {"key": "foo"}
//! routing key: clear   body: {}
//! ```
//!
//! ## Outbound
//! Routing key `response`, body `{"response": <payload>}` where the
//! payload is the stored pair, the value, or a status string.

mod command;
mod response;
mod codec;

pub use command::{Command, CommandEnvelope, CommandType, COMMAND_TABLE};
pub use response::Response;
pub use codec::{decode_command, decode_response, encode_response};
