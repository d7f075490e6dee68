//! Error types for the protocol engine.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the transport, codec, exchange and listener layers.
///
/// Every variant is fatal to the session it occurred on and to nothing else.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A read or write deadline elapsed.
    #[error("timed out after {after:?} waiting to {operation}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// Underlying transport failure, including peer disconnect.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A message violated its union invariant and could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),

    /// Malformed, truncated or unexpected payload.
    #[error("decode error: {0}")]
    Decode(String),

    /// A frame did not fit the maximum frame size.
    #[error("frame of {size} bytes exceeds maximum of {max} bytes")]
    OversizedFrame { size: usize, max: usize },

    /// Operation attempted outside the session state it is valid in.
    #[error("cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    /// The listener has been shut down.
    #[error("listener closed")]
    ListenerClosed,
}

impl From<prost::DecodeError> for ProtocolError {
    fn from(err: prost::DecodeError) -> Self {
        ProtocolError::Decode(err.to_string())
    }
}

/// Result type alias using ProtocolError.
pub type Result<T> = std::result::Result<T, ProtocolError>;
