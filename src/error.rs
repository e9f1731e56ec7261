//! Error types for AnyAgent
//!
//! This module defines all error types used throughout the AnyAgent runtime.
//! Uses `thiserror` for ergonomic error handling with automatic `Display` and
//! `Error` trait implementations.
//!
//! Errors fall into three families, which callers treat differently:
//!
//! - **Protocol errors** (`Protocol`, `Decode`): the envelope itself is bad.
//!   Fatal to the call that carried it, never to the whole server.
//! - **Turn errors** (`Turn`, `TurnTimeout`): the agent failed while
//!   computing a response. Recovered inside the session by emitting a
//!   user-visible error message.
//! - **Payment-policy errors** (`UnknownPricingKey`, `InvalidQuantity`):
//!   detected by the host's ledger, reported but never fatal.

use thiserror::Error;

/// The primary error type for AnyAgent operations.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Configuration-related errors (invalid config, unreadable file, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed envelope: violated trigger exclusivity, bad frame, etc.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Protobuf payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// Agent-internal failure while processing one turn
    #[error("{0}")]
    Turn(String),

    /// A turn exceeded the configured turn timeout
    #[error("Turn timed out after {0}s")]
    TurnTimeout(u64),

    /// The session was cancelled; no further emissions are accepted
    #[error("Session cancelled")]
    Cancelled,

    /// The response stream or request channel was closed unexpectedly
    #[error("Session closed")]
    SessionClosed,

    /// Pricing key not present in the host's billing configuration
    #[error("Unknown pricing key: {0}")]
    UnknownPricingKey(String),

    /// Payment quantity outside the accepted range
    #[error("Invalid payment quantity {quantity} for key '{key}'")]
    InvalidQuantity { key: String, quantity: i64 },

    /// Remote peer reported an error for a call
    #[error("Remote error: {0}")]
    Remote(String),

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AgentError {
    /// Returns `true` if this error invalidates the envelope rather than
    /// a single turn's computation.
    pub fn is_protocol(&self) -> bool {
        matches!(self, AgentError::Protocol(_) | AgentError::Decode(_))
    }

    /// Returns `true` if a turn failing with this error is reported to the
    /// user and the session keeps running.
    ///
    /// Everything except protocol errors and session teardown
    /// (`Cancelled`, `SessionClosed`) is isolated to the turn.
    pub fn is_turn_level(&self) -> bool {
        !self.is_protocol() && !matches!(self, AgentError::Cancelled | AgentError::SessionClosed)
    }

    /// Convenience constructor for turn-level failures.
    pub fn turn(msg: impl Into<String>) -> Self {
        AgentError::Turn(msg.into())
    }
}

/// A specialized `Result` type for AnyAgent operations.
pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AgentError::Config("missing port".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing port");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: AgentError = io_err.into();
        assert!(matches!(err, AgentError::Io(_)));
    }

    #[test]
    fn test_turn_error_displays_bare_message() {
        let err = AgentError::turn("upstream model unavailable");
        assert_eq!(err.to_string(), "upstream model unavailable");
    }

    #[test]
    fn test_error_classification() {
        assert!(AgentError::Protocol("two triggers".into()).is_protocol());
        assert!(!AgentError::Protocol("x".into()).is_turn_level());

        assert!(AgentError::turn("boom").is_turn_level());
        assert!(AgentError::TurnTimeout(30).is_turn_level());
        assert!(!AgentError::turn("boom").is_protocol());

        assert!(!AgentError::Cancelled.is_turn_level());
        assert!(!AgentError::SessionClosed.is_turn_level());
        assert!(!AgentError::Cancelled.is_protocol());
        assert!(AgentError::UnknownPricingKey("gold".into()).is_turn_level());
        assert!(AgentError::Remote("upstream".into()).is_turn_level());
    }

    #[test]
    fn test_invalid_quantity_display() {
        let err = AgentError::InvalidQuantity {
            key: "image".into(),
            quantity: -3,
        };
        assert_eq!(
            err.to_string(),
            "Invalid payment quantity -3 for key 'image'"
        );
    }

    #[test]
    fn test_decode_error_is_protocol() {
        use prost::Message;
        let decode_err = prost_types::Struct::decode(&[0xffu8][..]).unwrap_err();
        let err: AgentError = decode_err.into();
        assert!(err.is_protocol());
        assert!(!err.is_turn_level());
        assert!(err.to_string().starts_with("Decode error"));
    }
}
