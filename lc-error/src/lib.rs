//! Unified error handling for the liquidctl bridge
//!
//! One error type is shared by the protocol, transport, process and client
//! layers. Every variant maps onto an [`ErrorKind`] so callers can decide
//! between retrying, reconnecting and degrading without string matching.

use std::io;
use std::path::PathBuf;

/// Result type alias using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Failure classes the bridge client reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Helper executable is absent
    BinaryMissing,
    /// OS refused to launch the helper
    ProcessStart,
    /// Pipe connect/read/write failed; the connection must be rebuilt
    Transport,
    /// Bytes arrived but could not be understood
    Protocol,
    /// Helper answered with `status: "error"`
    Domain,
    /// Every retry for an operation was consumed
    Exhausted,
    /// Invalid or unreadable configuration
    Config,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::BinaryMissing => "binary-missing",
            ErrorKind::ProcessStart => "process-start",
            ErrorKind::Transport => "transport",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Domain => "domain",
            ErrorKind::Exhausted => "exhausted",
            ErrorKind::Config => "config",
        };
        f.write_str(name)
    }
}

/// Unified error type for all bridge operations
#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
    // ============================================================================
    // Helper Process Errors
    // ============================================================================
    #[error("Helper executable missing: {0}")]
    BinaryMissing(PathBuf),

    #[error("Failed to start helper {path}: {source}")]
    ProcessStart {
        path: PathBuf,
        source: io::Error,
    },

    // ============================================================================
    // Transport Errors
    // ============================================================================
    #[error("Pipe I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Timed out connecting to pipe {pipe} after {timeout_ms}ms")]
    ConnectTimeout {
        pipe: String,
        timeout_ms: u64,
    },

    #[error("Access denied to pipe {0}")]
    AccessDenied(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Helper closed the connection")]
    ConnectionClosed,

    #[error("Message too large: {size} bytes (max {max_size} bytes)")]
    MessageTooLarge {
        size: usize,
        max_size: usize,
    },

    // ============================================================================
    // Protocol Errors
    // ============================================================================
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Failed to decode message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Handshake was not acknowledged by the helper")]
    HandshakeRejected,

    // ============================================================================
    // Domain Errors
    // ============================================================================
    #[error("Helper reported error: {0}")]
    Domain(String),

    #[error("Helper reported no devices")]
    NoDevices,

    // ============================================================================
    // Lifecycle Errors
    // ============================================================================
    #[error("{operation} failed after {attempts} attempts: {last}")]
    Exhausted {
        operation: String,
        attempts: u32,
        last: String,
    },

    #[error("Bridge is shutting down")]
    ShuttingDown,

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },
}

impl BridgeError {
    /// Classify this error into the failure taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::BinaryMissing(_) => ErrorKind::BinaryMissing,
            BridgeError::ProcessStart { .. } => ErrorKind::ProcessStart,
            BridgeError::Io(_)
            | BridgeError::ConnectTimeout { .. }
            | BridgeError::AccessDenied(_)
            | BridgeError::Timeout(_)
            | BridgeError::ConnectionClosed
            | BridgeError::MessageTooLarge { .. } => ErrorKind::Transport,
            BridgeError::Protocol(_)
            | BridgeError::Json(_)
            | BridgeError::InvalidRequest(_)
            | BridgeError::HandshakeRejected => ErrorKind::Protocol,
            BridgeError::Domain(_) | BridgeError::NoDevices => ErrorKind::Domain,
            BridgeError::Exhausted { .. } | BridgeError::ShuttingDown => ErrorKind::Exhausted,
            BridgeError::Config(_)
            | BridgeError::InvalidConfig { .. }
            | BridgeError::FileRead { .. } => ErrorKind::Config,
        }
    }

    /// Whether the pipe must be torn down and reconnected after this error
    pub fn requires_reconnect(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    /// Create a protocol error from a string
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid config error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Map an I/O error from a pipe operation, folding timeouts and
    /// permission failures into their dedicated variants
    pub fn from_pipe_io(pipe: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
                Self::Timeout(format!("pipe {}: {}", pipe, err))
            }
            io::ErrorKind::PermissionDenied => Self::AccessDenied(pipe.to_string()),
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted => Self::ConnectionClosed,
            _ => Self::Io(err),
        }
    }
}
