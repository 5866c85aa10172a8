//! Text-to-speech
//!
//! - [`SynthesisBridge`] owns one session's synthesis streams, with
//!   pause/resume/stop and an explicit cancellation path
//! - [`HttpTts`] streams PCM16 from an HTTP synthesis endpoint

mod bridge;
mod http;

pub use bridge::{SynthesisBridge, SynthesisEvent, SynthesisStart};
pub use http::HttpTts;
