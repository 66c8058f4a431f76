//! Common error types for the connectivity exporter components.

use std::fmt;
use std::time::Duration;

/// A specialized Result type for connectivity operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for connectivity operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or incomplete check specification.
    #[error("{0}")]
    Config(String),

    #[error("unknown connectivity check kind: {0}")]
    UnknownKind(String),

    /// Host or service lookup failed.
    #[error("resolution failed: {0}")]
    Resolve(String),

    #[error("gateway discovery failed: {0}")]
    Gateway(String),

    /// A ping, connect or transfer measurement failed.
    #[error("measurement failed: {0}")]
    Measurement(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    /// Create a new configuration error.
    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }

    /// Create a new resolution error.
    pub fn resolve(msg: impl fmt::Display) -> Self {
        Error::Resolve(msg.to_string())
    }

    /// Create a new gateway discovery error.
    pub fn gateway(msg: impl fmt::Display) -> Self {
        Error::Gateway(msg.to_string())
    }

    /// Create a new measurement error.
    pub fn measurement(msg: impl fmt::Display) -> Self {
        Error::Measurement(msg.to_string())
    }

    /// Whether the error stems from check configuration rather than the network.
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_) | Error::UnknownKind(_))
    }
}
