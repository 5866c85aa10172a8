//! Language model integration
//!
//! Features:
//! - Anthropic Messages API with native tool use
//! - Server-sent event streaming of text deltas
//! - Retry with exponential backoff while opening the stream

pub mod claude;

pub use claude::{ClaudeBackend, ClaudeConfig};

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Timeout")]
    Timeout,

    #[error("Generation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for voice_session_core::Error {
    fn from(err: LlmError) -> Self {
        use voice_session_core::Error;
        match err {
            LlmError::Api(_) | LlmError::Network(_) => Error::Connection(err.to_string()),
            LlmError::InvalidResponse(_) | LlmError::Stream(_) => Error::Stream(err.to_string()),
            LlmError::Timeout => Error::Timeout("language model request".to_string()),
            LlmError::Cancelled => Error::Cancelled,
            LlmError::Configuration(msg) => Error::Config(msg),
        }
    }
}
