//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::constants::{audio, session, vendor};
use crate::{ConfigError, PipelineConfig};

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    #[serde(default)]
    pub server: ServerConfig,

    /// Session lifecycle and queues
    #[serde(default)]
    pub session: SessionConfig,

    /// VAD, framing, barge-in, segmentation and playback
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// STT / LLM / TTS vendor endpoints
    #[serde(default)]
    pub vendors: VendorConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_pipeline()?;
        self.validate_session()?;
        self.validate_server()?;
        Ok(())
    }

    fn validate_pipeline(&self) -> Result<(), ConfigError> {
        let pipeline = &self.pipeline;

        if !audio::SUPPORTED_SAMPLE_RATES.contains(&pipeline.audio.sample_rate) {
            return Err(invalid(
                "pipeline.audio.sample_rate",
                format!("Unsupported sample rate {}", pipeline.audio.sample_rate),
            ));
        }
        if !matches!(pipeline.audio.channels, 1 | 2) {
            return Err(invalid("pipeline.audio.channels", "Must be 1 or 2"));
        }
        if !(10..=1000).contains(&pipeline.audio.frame_ms) {
            return Err(invalid(
                "pipeline.audio.frame_ms",
                format!("Must be between 10 and 1000, got {}", pipeline.audio.frame_ms),
            ));
        }
        if !(pipeline.vad.noise_decay > 0.0 && pipeline.vad.noise_decay < 1.0) {
            return Err(invalid(
                "pipeline.vad.noise_decay",
                format!("Must be in (0, 1), got {}", pipeline.vad.noise_decay),
            ));
        }
        if pipeline.vad.energy_floor <= 0.0 {
            return Err(invalid("pipeline.vad.energy_floor", "Must be positive"));
        }
        if pipeline.barge_in.min_consecutive_frames == 0 {
            return Err(invalid(
                "pipeline.barge_in.min_consecutive_frames",
                "Must be at least 1",
            ));
        }
        if pipeline.playback.min_buffer_ms > pipeline.playback.max_buffer_ms {
            return Err(invalid(
                "pipeline.playback.min_buffer_ms",
                "Must not exceed max_buffer_ms",
            ));
        }
        if pipeline.sentence.max_buffer_chars < pipeline.sentence.min_length {
            return Err(invalid(
                "pipeline.sentence.max_buffer_chars",
                "Must be at least min_length",
            ));
        }

        Ok(())
    }

    fn validate_session(&self) -> Result<(), ConfigError> {
        if self.session.idle_timeout_secs == 0 {
            return Err(invalid("session.idle_timeout_secs", "Must be positive"));
        }
        if self.session.cleanup_interval_secs == 0 {
            return Err(invalid("session.cleanup_interval_secs", "Must be positive"));
        }
        if self.session.max_sessions == 0 {
            return Err(invalid("session.max_sessions", "Must be positive"));
        }
        if self.vendors.connect_timeout_ms == 0 {
            return Err(invalid("vendors.connect_timeout_ms", "Must be positive"));
        }
        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        let auth = &self.server.auth;
        if auth.enabled && auth.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(invalid(
                "server.auth.api_key",
                "Required when authentication is enabled",
            ));
        }
        if self.environment.is_production() && !auth.enabled {
            tracing::warn!("Authentication disabled in production environment");
        }
        Ok(())
    }
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.into(),
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// WebSocket path
    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// CORS allowed origins (empty allows any)
    #[serde(default)]
    pub cors_origins: Vec<String>,

    #[serde(default)]
    pub auth: AuthConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_ws_path() -> String {
    "/ws".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ws_path: default_ws_path(),
            cors_enabled: true,
            cors_origins: Vec::new(),
            auth: AuthConfig::default(),
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// Require the `auth` message token to match `api_key`
    #[serde(default)]
    pub enabled: bool,

    /// Set via VOICE_SESSION__SERVER__AUTH__API_KEY
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Session lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,

    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// System prompt for every conversation
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_idle_timeout_secs() -> u64 {
    session::IDLE_TIMEOUT_SECS
}
fn default_cleanup_interval_secs() -> u64 {
    session::CLEANUP_INTERVAL_SECS
}
fn default_max_sessions() -> usize {
    session::MAX_SESSIONS
}
fn default_event_queue_capacity() -> usize {
    session::EVENT_QUEUE_CAPACITY
}
fn default_outbound_queue_capacity() -> usize {
    session::OUTBOUND_QUEUE_CAPACITY
}
fn default_system_prompt() -> String {
    "You are a helpful voice assistant. Answer in short spoken sentences.".to_string()
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            max_sessions: default_max_sessions(),
            event_queue_capacity: default_event_queue_capacity(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            system_prompt: default_system_prompt(),
        }
    }
}

/// Vendor endpoints and connection policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorConfig {
    /// Bounded wait for any vendor handshake
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// First reconnect delay, doubled per attempt
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default)]
    pub stt: SttVendorConfig,

    #[serde(default)]
    pub llm: LlmVendorConfig,

    #[serde(default)]
    pub tts: TtsVendorConfig,
}

fn default_connect_timeout_ms() -> u64 {
    vendor::CONNECT_TIMEOUT_MS
}
fn default_max_reconnect_attempts() -> u32 {
    vendor::MAX_RECONNECT_ATTEMPTS
}
fn default_initial_backoff_ms() -> u64 {
    vendor::INITIAL_BACKOFF_MS
}

impl VendorConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    /// Whether every vendor has enough configuration to be called
    pub fn is_ready(&self) -> bool {
        !self.stt.url.is_empty() && !self.tts.url.is_empty() && !self.llm.api_key.is_empty()
    }
}

impl Default for VendorConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            stt: SttVendorConfig::default(),
            llm: LlmVendorConfig::default(),
            tts: TtsVendorConfig::default(),
        }
    }
}

/// Streaming transcription vendor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttVendorConfig {
    /// Websocket endpoint
    #[serde(default = "default_stt_url")]
    pub url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_language")]
    pub language: String,
}

fn default_stt_url() -> String {
    vendor::STT_URL.to_string()
}
fn default_language() -> String {
    "en-US".to_string()
}

impl Default for SttVendorConfig {
    fn default() -> Self {
        Self {
            url: default_stt_url(),
            api_key: None,
            language: default_language(),
        }
    }
}

/// Streaming language model vendor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmVendorConfig {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    /// Defaults to ANTHROPIC_API_KEY
    #[serde(default = "default_llm_api_key")]
    pub api_key: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_llm_endpoint() -> String {
    vendor::LLM_ENDPOINT.to_string()
}
fn default_llm_api_key() -> String {
    std::env::var("ANTHROPIC_API_KEY").unwrap_or_default()
}
fn default_llm_model() -> String {
    vendor::LLM_MODEL.to_string()
}
fn default_max_tokens() -> usize {
    512
}
fn default_temperature() -> f32 {
    0.7
}
fn default_llm_timeout_secs() -> u64 {
    60
}

impl Default for LlmVendorConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            api_key: default_llm_api_key(),
            model: default_llm_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

/// Streaming synthesis vendor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsVendorConfig {
    /// HTTP endpoint returning a chunked PCM16 body
    #[serde(default = "default_tts_url")]
    pub url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_voice")]
    pub voice: String,

    #[serde(default = "default_tts_sample_rate")]
    pub sample_rate: u32,
}

fn default_tts_url() -> String {
    vendor::TTS_URL.to_string()
}
fn default_voice() -> String {
    "default".to_string()
}
fn default_tts_sample_rate() -> u32 {
    vendor::TTS_SAMPLE_RATE
}

impl Default for TtsVendorConfig {
    fn default() -> Self {
        Self {
            url: default_tts_url(),
            api_key: None,
            voice: default_voice(),
            sample_rate: default_tts_sample_rate(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,

    /// Install the Prometheus recorder and serve /metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
        }
    }
}

/// Load settings from `config/` files and environment variables
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    load_settings_from(Path::new("config"), env)
}

/// Load settings from `{dir}/default.*`, `{dir}/{env}.*`, then
/// `VOICE_SESSION__*` environment variables.
pub fn load_settings_from(dir: &Path, env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::from(dir.join("default")).required(false));

    if let Some(env_name) = env {
        builder = builder.add_source(File::from(dir.join(env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("VOICE_SESSION")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}
