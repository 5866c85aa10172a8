//! Error types shared across the voice session crates

use thiserror::Error;

/// Result alias using the core [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Session pipeline errors
///
/// `Cancelled` is an expected outcome of `pause()`/`stop()` on a bridge and
/// must never reach the user-facing error channel.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Vendor handshake, auth or reconnect failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Mid-stream vendor fault
    #[error("Stream error: {0}")]
    Stream(String),

    /// Malformed client control message
    #[error("Validation error: {0}")]
    Validation(String),

    /// Operation aborted by pause/stop
    #[error("Cancelled")]
    Cancelled,

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Stable label used for `error` messages and metric tags
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Connection(_) => "connection",
            Error::Stream(_) => "stream",
            Error::Validation(_) => "validation",
            Error::Cancelled => "cancelled",
            Error::Timeout(_) => "timeout",
            Error::Config(_) => "config",
            Error::Serialization(_) => "serialization",
            Error::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
