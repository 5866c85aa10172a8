//! Configuration management for the voice session server
//!
//! Settings are layered from:
//! - `config/default.{toml,yaml,json}`
//! - `config/{env}.{toml,yaml,json}`
//! - Environment variables (`VOICE_SESSION__SECTION__KEY`)

pub mod constants;
pub mod pipeline;
pub mod settings;

pub use pipeline::{
    AudioConfig, BargeInConfig, PipelineConfig, PlaybackConfig, SentenceConfig, VadConfig,
};
pub use settings::{
    load_settings, load_settings_from, AuthConfig, LlmVendorConfig, ObservabilityConfig,
    RuntimeEnvironment, ServerConfig, SessionConfig, Settings, SttVendorConfig, TtsVendorConfig,
    VendorConfig,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
