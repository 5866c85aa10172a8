//! Core traits for the voice session pipeline
//!
//! Vendors and external collaborators sit behind these traits so the
//! bridges and the session coordinator can be driven by mocks in tests.
//!
//! ```text
//! Vendors:
//!   - SpeechToText: streaming transcription connection
//!   - LanguageModel: streaming generation with tool calls
//!   - TextToSpeech: streaming synthesis
//!
//! Collaborators:
//!   - FunctionExecutor: domain services invoked by tool calls
//!   - AuditSink: lifecycle notifications for audit logging
//! ```

mod collaborators;
mod llm;
mod speech;

pub use collaborators::{AuditEvent, AuditSink, FunctionExecutor};
pub use llm::LanguageModel;
pub use speech::{
    SpeechToText, SttCommand, SttConnection, SttVendorEvent, TextToSpeech, NORMAL_CLOSE,
};
