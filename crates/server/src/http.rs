//! HTTP Endpoints
//!
//! Health probes, Prometheus metrics, session management and the session
//! websocket.

use axum::{
    extract::{Json, Path, State},
    http::{HeaderValue, Method, StatusCode},
    middleware,
    response::IntoResponse,
    routing::get,
    Router,
};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::require_api_key;
use crate::metrics::metrics_handler;
use crate::session::SessionInfo;
use crate::state::AppState;
use crate::websocket::ws_handler;
use crate::ServerError;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let server = &state.settings.server;
    let cors_layer = build_cors_layer(&server.cors_origins, server.cors_enabled);
    let ws_path = server.ws_path.clone();

    let api = Router::new()
        .route(
            "/api/sessions/:session_id",
            get(get_session).delete(delete_session),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .route(&ws_path, get(ws_handler))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
}

fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        return CorsLayer::new();
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!("Invalid CORS origin: {}", origin);
                None
            })
        })
        .collect();

    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    if parsed.is_empty() {
        tracing::debug!("No CORS origins configured, allowing any origin");
        layer.allow_origin(Any)
    } else {
        tracing::info!("CORS configured with {} origins", parsed.len());
        layer.allow_origin(parsed)
    }
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "active_sessions": state.sessions.count(),
    }))
}

/// Ready once every vendor has enough configuration to be called
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let vendors = &state.settings.vendors;
    let checks = json!({
        "stt": !vendors.stt.url.is_empty(),
        "llm": !vendors.llm.api_key.is_empty(),
        "tts": !vendors.tts.url.is_empty(),
    });

    if vendors.is_ready() {
        (StatusCode::OK, Json(json!({ "ready": true, "checks": checks })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "ready": false, "checks": checks })),
        )
    }
}

async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionInfo>, StatusCode> {
    state
        .sessions
        .get(&session_id)
        .map(|session| Json(session.info()))
        .ok_or_else(|| ServerError::Session(format!("{} not found", session_id)).into())
}

async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> StatusCode {
    if state.sessions.expire(&session_id) {
        StatusCode::NO_CONTENT
    } else {
        ServerError::Session(format!("{} not found", session_id)).into()
    }
}
