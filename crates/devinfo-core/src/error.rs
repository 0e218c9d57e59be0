//! Error types for devinfo.
//!
//! Errors that are returned directly to a caller live here. Failures of an
//! individual call are normally captured as [`CallOutcome::Failed`] instead and
//! only surface as [`DevinfoError::Call`] when a caller explicitly waits on a
//! call and asks for a `Result`.
//!
//! [`CallOutcome::Failed`]: crate::outcome::CallOutcome::Failed

use crate::outcome::ErrorKind;

/// The main error type for devinfo operations.
#[derive(Debug, thiserror::Error)]
pub enum DevinfoError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid configuration value
    #[error("Invalid configuration for '{field}': {message}")]
    InvalidConfig { field: String, message: String },

    /// Configuration file not found
    #[error("Configuration file not found at path: {0}")]
    ConfigNotFound(String),

    /// Endpoint could not be constructed (bad host, port or URI)
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Request rejected before it was sent
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Address resolution or transport setup failed for an endpoint
    #[error("Connection to '{endpoint}' failed: {message}")]
    Connection { endpoint: String, message: String },

    /// A call was issued on a connection that has already been closed
    #[error("Connection to '{0}' is closed")]
    ConnectionClosed(String),

    /// A call finished with a classified failure
    #[error("Call failed ({kind}): {message}")]
    Call { kind: ErrorKind, message: String },

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DevinfoError {
    /// Create a config error with a message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create an invalid config error
    pub fn invalid_config<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a connection error for an endpoint
    pub fn connection<E: Into<String>, M: Into<String>>(endpoint: E, message: M) -> Self {
        Self::Connection {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create a classified call error
    pub fn call<S: Into<String>>(kind: ErrorKind, message: S) -> Self {
        Self::Call {
            kind,
            message: message.into(),
        }
    }

    /// The call error kind, if this error came from a finished call.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Call { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Check if this error is transient (the caller may retry)
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection { .. } => true,
            Self::Call { kind, .. } => {
                matches!(kind, ErrorKind::TransportFailure | ErrorKind::Timeout)
            }
            _ => false,
        }
    }

    /// Check if this error is fatal (the host application should stop)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::InvalidConfig { .. } | Self::Config(_)
        )
    }
}

/// Result type alias for devinfo operations
pub type Result<T> = std::result::Result<T, DevinfoError>;
