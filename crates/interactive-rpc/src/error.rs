//! Error types for the RPC socket.
//!
//! Errors fall into four groups:
//! - transport/session errors, reported on the socket's error channel and never
//!   fatal to the connection lifecycle
//! - correlation errors (`Timeout`, `Cancelled`, `TransportClosed`) which reject
//!   a pending call
//! - protocol errors carried inside a reply's `error` field
//! - dispatch errors raised for inbound methods nobody handles

use crate::wire::{codes, RpcError};
use std::time::Duration;
use thiserror::Error;

/// Main error type for the RPC socket.
///
/// The enum is `Clone` so the engine can fan errors out over a broadcast
/// channel; underlying library errors are captured as messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SocketError {
    // Correlation errors
    #[error("Reply timed out after {0:?}")]
    Timeout(Duration),

    #[error("Packet was cancelled")]
    Cancelled,

    #[error("Transport closed before the call could complete")]
    TransportClosed,

    // Errors returned by the remote peer
    #[error("Remote error: {0}")]
    Protocol(RpcError),

    // Transport/session errors
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Failed to decode frame: {message}")]
    Decode { message: String },

    // Dispatch errors
    #[error("Unknown method name: {method}")]
    UnknownMethod { method: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for socket operations.
pub type Result<T> = std::result::Result<T, SocketError>;

impl From<serde_json::Error> for SocketError {
    fn from(err: serde_json::Error) -> Self {
        SocketError::Decode {
            message: err.to_string(),
        }
    }
}

impl From<url::ParseError> for SocketError {
    fn from(err: url::ParseError) -> Self {
        SocketError::Config {
            message: format!("invalid url: {}", err),
        }
    }
}

impl SocketError {
    /// Convert to the wire error object sent back to the peer.
    ///
    /// Remote errors keep their original code and path. Everything raised
    /// locally maps onto the protocol's numeric codes.
    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            SocketError::Protocol(err) => err.clone(),
            SocketError::UnknownMethod { .. } => {
                RpcError::new(codes::UNKNOWN_METHOD_NAME, self.to_string())
            }
            SocketError::Decode { .. } => RpcError::new(codes::INVALID_PAYLOAD, self.to_string()),
            _ => RpcError::new(codes::PROCESSING_ERROR, self.to_string()),
        }
    }

    /// Whether this error ends a pending call because of cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SocketError::Cancelled)
    }

    /// Whether this error ends a pending call because no reply arrived in time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SocketError::Timeout(_))
    }

    pub(crate) fn transport(message: impl Into<String>) -> Self {
        SocketError::Transport {
            message: message.into(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        SocketError::Config {
            message: message.into(),
        }
    }
}
