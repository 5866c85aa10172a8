//! Client/server control messages
//!
//! Control messages are JSON objects discriminated by `type`. Anything that
//! does not parse as JSON is raw PCM16 audio.

use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::transcript::{SynthesisChunk, TranscriptEvent};

/// Messages sent by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "auth")]
    Auth { token: String },
    #[serde(rename = "audio.start")]
    AudioStart,
    #[serde(rename = "audio.stop")]
    AudioStop,
    #[serde(rename = "ui.interrupt")]
    Interrupt,
}

/// Messages sent to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "stt.partial")]
    SttPartial {
        utterance_id: u64,
        text: String,
        confidence: f32,
    },
    #[serde(rename = "stt.final")]
    SttFinal {
        utterance_id: u64,
        text: String,
        confidence: f32,
    },
    #[serde(rename = "llm.partial")]
    LlmPartial { text: String },
    #[serde(rename = "tts.chunk")]
    TtsChunk {
        /// Base64-encoded PCM16
        audio: String,
        sequence: u64,
        sample_rate: u32,
    },
    #[serde(rename = "tts.end")]
    TtsEnd,
    #[serde(rename = "status")]
    Status {
        state: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl ServerMessage {
    pub fn transcript(event: &TranscriptEvent) -> Self {
        if event.is_final {
            ServerMessage::SttFinal {
                utterance_id: event.utterance_id,
                text: event.text.clone(),
                confidence: event.confidence,
            }
        } else {
            ServerMessage::SttPartial {
                utterance_id: event.utterance_id,
                text: event.text.clone(),
                confidence: event.confidence,
            }
        }
    }

    pub fn tts_chunk(chunk: &SynthesisChunk) -> Self {
        ServerMessage::TtsChunk {
            audio: base64::engine::general_purpose::STANDARD.encode(&chunk.audio),
            sequence: chunk.sequence,
            sample_rate: chunk.sample_rate,
        }
    }

    pub fn status(state: impl Into<String>) -> Self {
        ServerMessage::Status {
            state: state.into(),
            session_id: None,
            detail: None,
        }
    }

    pub fn status_with_detail(state: impl Into<String>, detail: impl Into<String>) -> Self {
        ServerMessage::Status {
            state: state.into(),
            session_id: None,
            detail: Some(detail.into()),
        }
    }

    /// Error notification for the client. Callers filter out `Cancelled`.
    pub fn error(err: &Error) -> Self {
        ServerMessage::Error {
            code: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Classified inbound transport payload
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Control(ClientMessage),
    Audio(Bytes),
    Invalid(Error),
}

impl InboundFrame {
    /// Classify a text payload: JSON control message, raw audio, or invalid control
    pub fn from_text(text: &str) -> Self {
        match serde_json::from_str::<serde_json::Value>(text) {
            Err(_) => InboundFrame::Audio(Bytes::copy_from_slice(text.as_bytes())),
            Ok(value) => match serde_json::from_value::<ClientMessage>(value) {
                Ok(msg) => InboundFrame::Control(msg),
                Err(e) => InboundFrame::Invalid(Error::Validation(e.to_string())),
            },
        }
    }

    /// Classify a binary payload. Valid UTF-8 JSON is still a control message.
    pub fn from_binary(data: Bytes) -> Self {
        match std::str::from_utf8(&data) {
            Ok(text) if text.trim_start().starts_with('{') => match Self::from_text(text) {
                InboundFrame::Audio(_) => InboundFrame::Audio(data),
                other => other,
            },
            _ => InboundFrame::Audio(data),
        }
    }
}
