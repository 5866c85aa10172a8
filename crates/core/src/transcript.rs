//! Transcription, response and synthesis data model

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Transcript update for one logical utterance
///
/// Interim events are superseded by the next event carrying the same
/// `utterance_id`; once a final event is emitted the id is never reused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    pub utterance_id: u64,
    pub text: String,
    pub confidence: f32,
    pub is_final: bool,
}

/// Function invocation requested by the language model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallRequest {
    /// Vendor-assigned call id, echoed back with the result
    pub id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
}

/// Result of an external function invocation, passed through uninterpreted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallResult {
    pub id: String,
    pub name: String,
    pub result: Value,
}

/// Fragment of a streaming response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseChunk {
    pub text: String,
    /// Safe to hand to synthesis without waiting for more text
    pub is_sentence_complete: bool,
    /// Remainder flushed at the end of a generation
    #[serde(default)]
    pub is_final: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCallRequest>,
}

impl ResponseChunk {
    pub fn sentence(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_sentence_complete: true,
            is_final: false,
            function_call: None,
        }
    }

    pub fn flushed(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_sentence_complete: false,
            is_final: true,
            function_call: None,
        }
    }

    /// Tool invocation requested by the model; carries no speakable text
    pub fn call(request: FunctionCallRequest) -> Self {
        Self {
            text: String::new(),
            is_sentence_complete: false,
            is_final: false,
            function_call: Some(request),
        }
    }

    /// Whether this chunk should be forwarded to synthesis
    pub fn is_speakable(&self) -> bool {
        (self.is_sentence_complete || self.is_final) && !self.text.trim().is_empty()
    }
}

/// Synthesized audio chunk (PCM16 at `sample_rate`)
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisChunk {
    pub audio: Bytes,
    pub sequence: u64,
    pub sample_rate: u32,
}
