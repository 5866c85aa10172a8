//! Voice Session Server
//!
//! Entry point for the voice session server.

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use voice_session_config::{load_settings, Settings};
use voice_session_llm::{ClaudeBackend, ClaudeConfig};
use voice_session_pipeline::{HttpTts, WebSocketStt};
use voice_session_server::{
    create_router, init_metrics, AppState, BuiltinFunctions, SessionServices, TracingAuditSink,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = std::env::var("VOICE_SESSION_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => {
            // Tracing not yet initialized
            eprintln!(
                "Loaded configuration from files (env: {})",
                env.as_deref().unwrap_or("development")
            );
            settings
        }
        Err(e) => {
            eprintln!("Warning: Failed to load config: {}. Using defaults.", e);
            Settings::default()
        }
    };

    init_tracing(&settings);

    tracing::info!(
        environment = ?settings.environment,
        "Starting voice session server v{}",
        env!("CARGO_PKG_VERSION")
    );

    if settings.observability.metrics_enabled {
        init_metrics().context("installing Prometheus recorder")?;
        tracing::info!("Prometheus metrics enabled at /metrics");
    }

    let services = build_services(&settings)?;
    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .context("invalid server.host / server.port")?;

    let state = AppState::new(settings, services);
    let cleanup = state.sessions.start_cleanup_task();
    let sessions = state.sessions.clone();
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    let _ = cleanup.send(true);
    let closed = sessions.close_all();
    tracing::info!(closed, "Server shutdown complete");

    Ok(())
}

fn build_services(settings: &Settings) -> anyhow::Result<SessionServices> {
    let vendors = &settings.vendors;

    let stt = WebSocketStt::new(vendors.stt.clone(), &settings.pipeline.audio);
    let tts = HttpTts::new(vendors).context("creating TTS client")?;
    let llm = ClaudeBackend::new(ClaudeConfig::from_vendor(&vendors.llm, vendors.connect_timeout()))
        .context("creating LLM backend (set ANTHROPIC_API_KEY or vendors.llm.api_key)")?;

    let functions = BuiltinFunctions::with_defaults();
    let tools = functions.definitions();
    tracing::info!(
        stt = %vendors.stt.url,
        tts = %vendors.tts.url,
        model = %vendors.llm.model,
        tools = tools.len(),
        "Vendors configured"
    );

    Ok(SessionServices {
        stt: Arc::new(stt),
        llm: Arc::new(llm),
        tts: Arc::new(tts),
        functions: Arc::new(functions),
        tools,
        audit: Arc::new(TracingAuditSink),
    })
}

fn init_tracing(settings: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &settings.observability.log_level;
        format!("voice_session={},audit=info,tower_http=debug", level).into()
    });

    let fmt_layer = if settings.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
