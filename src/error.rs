//! Error types for admwire.

use std::time::Duration;

use thiserror::Error;

/// Main error type for all admwire operations.
#[derive(Debug, Error)]
pub enum AdminError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// ZMQ socket error.
    #[error("ZMQ error: {0}")]
    Zmq(#[from] zeromq::ZmqError),

    /// Channel could not be established, or is not connected.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Bytes could not be parsed as a complete, valid JSON object.
    #[error("malformed frame: {0}")]
    Decode(String),

    /// No reply arrived within the configured deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// A well-formed reply whose outcome signals failure on the gateway.
    #[error("gateway error {code}: {reason}")]
    Remote {
        /// Error code reported by the gateway.
        code: i64,
        /// Human-readable reason reported by the gateway.
        reason: String,
    },

    /// The channel was closed while the request was still pending.
    #[error("connection closed")]
    Closed,
}

/// Result type alias using AdminError.
pub type Result<T> = std::result::Result<T, AdminError>;
