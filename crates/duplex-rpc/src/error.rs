//! Error types for the duplex RPC runtime.
//!
//! Every fallible operation in the crate returns [`RpcError`]. Callers of a
//! remote method see the same error type whether the failure was a local cast
//! problem, an application error reported by the peer, or a broken transport;
//! they tell them apart by matching on the variant.

use serde_json::Value;
use thiserror::Error;

/// Main error type for the RPC runtime.
#[derive(Debug, Error)]
pub enum RpcError {
    // Transport errors
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Connect failed: {message}")]
    Connect { message: String, recoverable: bool },

    #[error("Connection is unrecoverable")]
    Unrecoverable,

    // Protocol errors
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Unacceptable content type: {content_type}")]
    UnacceptableContentType { content_type: String },

    #[error("Frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Invalid message: {message}")]
    InvalidMessage {
        message: String,
        /// Id of the offending message, when one could be recovered.
        id: Option<Value>,
    },

    // Invocation errors
    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    #[error("Invalid params for {method}: {message}")]
    InvalidParams { method: String, message: String },

    #[error("Cannot cast {value} to {target}")]
    Cast { target: String, value: String },

    #[error("Remote error {code}: {message}")]
    Remote {
        code: i32,
        message: String,
        data: Option<Value>,
    },

    // Lifecycle errors
    #[error("Response queue closed")]
    QueueClosed,

    #[error("Communicator is not listening")]
    NotListening,

    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for RPC operations.
pub type Result<T> = std::result::Result<T, RpcError>;

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        RpcError::Transport {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl RpcError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        RpcError::Config {
            message: message.into(),
        }
    }

    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        RpcError::Protocol {
            message: message.into(),
        }
    }

    /// Map a failed connect attempt, judging whether retrying can help.
    pub fn connect_failed(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let recoverable = !matches!(
            err.kind(),
            ErrorKind::PermissionDenied
                | ErrorKind::InvalidInput
                | ErrorKind::NotFound
                | ErrorKind::Unsupported
                | ErrorKind::AddrNotAvailable
        );
        RpcError::Connect {
            message: err.to_string(),
            recoverable,
        }
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Standard JSON-RPC error codes:
    /// - -32700: Parse error
    /// - -32600: Invalid Request
    /// - -32601: Method not found
    /// - -32602: Invalid params
    /// - -32603: Internal error
    ///
    /// Transport and connection failures use -32000. Remote errors keep the
    /// code the peer sent.
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            RpcError::Json { .. } => -32700,

            RpcError::InvalidMessage { .. }
            | RpcError::Protocol { .. }
            | RpcError::UnacceptableContentType { .. }
            | RpcError::FrameTooLarge { .. } => -32600,

            RpcError::MethodNotFound { .. } => -32601,

            RpcError::InvalidParams { .. } | RpcError::Cast { .. } => -32602,

            RpcError::Transport { .. }
            | RpcError::ConnectionClosed
            | RpcError::Connect { .. }
            | RpcError::Unrecoverable
            | RpcError::QueueClosed
            | RpcError::NotListening => -32000,

            RpcError::Remote { code, .. } => *code,

            RpcError::Config { .. } => -32603,
        }
    }

    /// Check if this error came from the byte stream and should feed the
    /// recovery state machine.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RpcError::Transport { .. } | RpcError::ConnectionClosed
        )
    }

    /// Check if a failed connect may succeed on a later attempt.
    pub fn is_recoverable(&self) -> bool {
        match self {
            RpcError::Connect { recoverable, .. } => *recoverable,
            RpcError::Unrecoverable | RpcError::Config { .. } => false,
            other => other.is_transport(),
        }
    }
}
