//! Core types for the voice session pipeline
//!
//! This crate provides the types shared by every other crate:
//! - PCM16 audio frames and helpers
//! - Transcript, response and synthesis data model
//! - Client/server protocol messages
//! - Error taxonomy
//! - Vendor and collaborator traits

pub mod audio;
pub mod error;
pub mod llm_types;
pub mod protocol;
pub mod traits;
pub mod transcript;

pub use audio::{AudioFrame, Channels, SampleRate};
pub use error::{Error, Result};
pub use llm_types::{
    FinishReason, GenerateRequest, GenerationOutcome, Message, Role, ToolDefinition,
};
pub use protocol::{ClientMessage, InboundFrame, ServerMessage};
pub use traits::{
    AuditEvent, AuditSink, FunctionExecutor, LanguageModel, SpeechToText, SttCommand,
    SttConnection, SttVendorEvent, TextToSpeech, NORMAL_CLOSE,
};
pub use transcript::{
    FunctionCallRequest, FunctionCallResult, ResponseChunk, SynthesisChunk, TranscriptEvent,
};
