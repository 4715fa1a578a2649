//! Error types for the sockrpc runtime.
//!
//! The variants follow the failure taxonomy of the protocol: transport faults,
//! protocol violations, dispatch failures, remote-call failures, and
//! configuration mistakes. Local recoverable conditions never tear down
//! unrelated connections.

use std::time::Duration;
use thiserror::Error;

/// Main error type for the sockrpc runtime.
#[derive(Debug, Error)]
pub enum RpcError {
    // Transport errors
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Connection closed")]
    ConnectionClosed,

    // Protocol errors
    #[error("The message exceeds the maximum allowed message size: {limit} bytes (got {size} bytes)")]
    MessageTooBig { size: usize, limit: usize },

    #[error("Binary messages are not supported")]
    BinaryNotSupported,

    #[error("Text frame is not valid for the configured encoding: {message}")]
    InvalidEncoding { message: String },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Dispatch errors
    #[error("{name}: The object does not contain the provided method name: {name}")]
    MethodNotFound { name: String },

    #[error("{name}: The number of provided parameters mismatches the number of required arguments (expected {expected}, got {actual})")]
    ArityMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("{name}: Argument {index} cannot be converted to the expected type: {message}")]
    ArgumentConversion {
        name: String,
        index: usize,
        message: String,
    },

    #[error("{0}")]
    Handler(String),

    // Remote-call errors
    #[error("{0}")]
    Remote(String),

    #[error("The remote call timed out after {0:?}")]
    Timeout(Duration),

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("There are {count} target connections for a single relay connection")]
    RelayTargets { count: usize },
}

/// Result type alias for sockrpc operations.
pub type Result<T> = std::result::Result<T, RpcError>;

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        RpcError::Transport {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl RpcError {
    /// Create a transport error from a plain message.
    pub fn transport(message: impl Into<String>) -> Self {
        RpcError::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error from a plain message.
    pub fn config(message: impl Into<String>) -> Self {
        RpcError::Config {
            message: message.into(),
        }
    }

    /// True for failures that a reconnecting client may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RpcError::Transport { .. } | RpcError::ConnectionClosed | RpcError::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RpcError::MethodNotFound {
            name: "Add".into(),
        };
        assert_eq!(
            err.to_string(),
            "Add: The object does not contain the provided method name: Add"
        );
    }

    #[test]
    fn test_message_too_big_display() {
        let err = RpcError::MessageTooBig {
            size: 70_000,
            limit: 65_536,
        };
        assert_eq!(
            err.to_string(),
            "The message exceeds the maximum allowed message size: 65536 bytes (got 70000 bytes)"
        );
    }

    #[test]
    fn test_retryable_errors() {
        assert!(RpcError::ConnectionClosed.is_retryable());
        assert!(RpcError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(!RpcError::config("bad").is_retryable());
    }
}
