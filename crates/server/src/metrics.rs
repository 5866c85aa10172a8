//! Prometheus metrics
//!
//! Helpers are no-ops until [`init_metrics`] installs the recorder, so
//! tests and metrics-disabled deployments can call them freely.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

use crate::state::AppState;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Call once at startup.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_default_metrics();
    METRICS_HANDLE.get_or_init(|| handle.clone());
    Ok(handle)
}

pub fn get_metrics_handle() -> Option<&'static PrometheusHandle> {
    METRICS_HANDLE.get()
}

fn register_default_metrics() {
    gauge!("voice_session_active_sessions").set(0.0);
    counter!("voice_session_sessions_total").absolute(0);
    counter!("voice_session_barge_ins_total").absolute(0);
    counter!("voice_session_stt_reconnects_total").absolute(0);

    for kind in ["connection", "stream", "validation", "timeout", "internal"] {
        counter!("voice_session_errors_total", "kind" => kind).absolute(0);
    }
}

pub fn record_session_created() {
    counter!("voice_session_sessions_total").increment(1);
}

pub fn record_active_sessions(count: usize) {
    gauge!("voice_session_active_sessions").set(count as f64);
}

/// Record a barge-in; `source` is `vad`, `client` or `transcript`
pub fn record_barge_in(source: &'static str) {
    counter!("voice_session_barge_ins_total", "source" => source).increment(1);
}

pub fn record_stt_reconnect() {
    counter!("voice_session_stt_reconnects_total").increment(1);
}

/// Count an error by [`voice_session_core::Error::kind`]. Cancellations
/// are expected and never counted.
pub fn record_error(err: &voice_session_core::Error) {
    if err.is_cancelled() {
        return;
    }
    counter!("voice_session_errors_total", "kind" => err.kind()).increment(1);
}

/// Final transcript to first synthesized chunk
pub fn record_first_audio_latency(duration_secs: f64) {
    histogram!("voice_session_first_audio_latency_seconds").record(duration_secs);
}

/// Metrics endpoint handler
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    record_active_sessions(state.sessions.count());

    match get_metrics_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain")],
            "Metrics not initialized".to_string(),
        ),
    }
}
