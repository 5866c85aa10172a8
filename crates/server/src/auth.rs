//! Session authentication
//!
//! Voice sessions authenticate in-band with an `auth` control message. The
//! session management API under `/api` uses `Authorization: Bearer <key>`
//! with the same key.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::atomic::{AtomicBool, Ordering};

use voice_session_config::AuthConfig;

use crate::state::AppState;
use crate::ServerError;

static AUTH_DISABLED_WARNED: AtomicBool = AtomicBool::new(false);

/// Token checker built from [`AuthConfig`]
#[derive(Debug, Clone)]
pub struct Authenticator {
    api_key: Option<String>,
}

impl Authenticator {
    pub fn new(config: &AuthConfig) -> Self {
        let api_key = if config.enabled {
            config.api_key.clone().filter(|key| !key.is_empty())
        } else {
            None
        };
        Self { api_key }
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// Check a session token. With auth disabled any non-empty token passes.
    pub fn verify(&self, token: &str) -> Result<(), ServerError> {
        if token.trim().is_empty() {
            return Err(ServerError::Auth("missing token".to_string()));
        }

        match &self.api_key {
            None => {
                if !AUTH_DISABLED_WARNED.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        "Session authentication is DISABLED. Set VOICE_SESSION__SERVER__AUTH__ENABLED=true for production."
                    );
                }
                Ok(())
            }
            Some(expected) => {
                if constant_time_compare(token.as_bytes(), expected.as_bytes()) {
                    Ok(())
                } else {
                    Err(ServerError::Auth("invalid token".to_string()))
                }
            }
        }
    }

    /// Check an `Authorization` header value
    pub fn verify_header(&self, value: Option<&str>) -> Result<(), ServerError> {
        if !self.is_enabled() {
            return Ok(());
        }
        match value {
            Some(value) => match value.strip_prefix("Bearer ") {
                Some(token) => self.verify(token),
                None => Err(ServerError::InvalidRequest(
                    "expected Authorization: Bearer <token>".to_string(),
                )),
            },
            None => Err(ServerError::Auth("missing Authorization header".to_string())),
        }
    }
}

/// Middleware guarding the session management API
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match state.auth.verify_header(value) {
        Ok(()) => next.run(request).await,
        Err(err) => {
            tracing::warn!(path = %request.uri().path(), error = %err, "Rejected API request");
            let message = err.to_string();
            (StatusCode::from(err), message).into_response()
        }
    }
}

/// Constant-time comparison to prevent timing attacks
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
