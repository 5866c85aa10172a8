//! Audio pipeline for real-time voice sessions
//!
//! Features:
//! - Energy-based voice activity detection with adaptive noise floor
//! - Fixed-duration framing of inbound PCM16
//! - Sentence boundary detection for incremental synthesis
//! - Barge-in detection while synthesized speech is playing
//! - Client-side playback jitter buffer
//! - Bridges wrapping streaming STT, LLM and TTS vendors

pub mod barge_in;
pub mod framer;
pub mod playback;
pub mod processors;
pub mod response;
pub mod stt;
pub mod tts;
pub mod vad;

pub use barge_in::{BargeInDetector, BargeInResult};
pub use framer::AudioFramer;
pub use playback::{JitterBuffer, ScheduledChunk};
pub use processors::{SentenceBoundaryDetector, SpeakableUnit, UnitKind};
pub use response::{ResponseEvent, ResponseStreamBridge};
pub use stt::{TranscriptionBridge, TranscriptionConfig, TranscriptionEvent, WebSocketStt};
pub use tts::{HttpTts, SynthesisBridge, SynthesisEvent, SynthesisStart};
pub use vad::{EnergyVad, VadResult, VadState, VadTransition};

use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<PipelineError> for voice_session_core::Error {
    fn from(err: PipelineError) -> Self {
        use voice_session_core::Error;
        match err {
            PipelineError::Connection(msg) => Error::Connection(msg),
            PipelineError::Stream(msg) => Error::Stream(msg),
            PipelineError::Cancelled => Error::Cancelled,
            PipelineError::Timeout(msg) => Error::Timeout(msg),
            PipelineError::NotConnected => Error::Connection("not connected".to_string()),
            PipelineError::Config(msg) => Error::Config(msg),
        }
    }
}
