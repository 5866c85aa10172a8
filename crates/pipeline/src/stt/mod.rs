//! Speech-to-text
//!
//! - [`TranscriptionBridge`] supervises one streaming recognition
//!   connection, assigns utterance ids and reconnects on abnormal close
//! - [`WebSocketStt`] speaks a websocket streaming recognition protocol

mod bridge;
mod websocket;

pub use bridge::{TranscriptionBridge, TranscriptionConfig, TranscriptionEvent};
pub use websocket::WebSocketStt;
