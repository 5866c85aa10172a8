//! Voice Session Server
//!
//! Hosts one full-duplex voice session per websocket connection and the
//! HTTP endpoints used to observe and manage them.

pub mod audit;
pub mod auth;
pub mod coordinator;
pub mod functions;
pub mod http;
pub mod metrics;
pub mod session;
pub mod state;
pub mod websocket;

pub use audit::TracingAuditSink;
pub use auth::Authenticator;
pub use coordinator::{SessionCoordinator, SessionEvent, SessionState};
pub use functions::BuiltinFunctions;
pub use http::create_router;
pub use metrics::init_metrics;
pub use session::{Session, SessionInfo, SessionRegistry};
pub use state::{AppState, SessionServices};

use thiserror::Error;

/// Server errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServerError {
    #[error("Session error: {0}")]
    Session(String),

    #[error("Session limit of {0} reached")]
    SessionLimit(usize),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Code carried by the client `error` message
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::Session(_) => "session",
            ServerError::SessionLimit(_) => "capacity",
            ServerError::Auth(_) => "auth",
            ServerError::InvalidRequest(_) => "validation",
            ServerError::Internal(_) => "internal",
        }
    }
}

impl From<ServerError> for axum::http::StatusCode {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Session(_) => axum::http::StatusCode::NOT_FOUND,
            ServerError::SessionLimit(_) => axum::http::StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Auth(_) => axum::http::StatusCode::UNAUTHORIZED,
            ServerError::InvalidRequest(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::Internal(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ServerError> for voice_session_core::Error {
    fn from(err: ServerError) -> Self {
        use voice_session_core::Error;
        match err {
            ServerError::InvalidRequest(msg) | ServerError::Auth(msg) => Error::Validation(msg),
            other => Error::Internal(other.to_string()),
        }
    }
}
