//! Speech vendor traits

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::Result;

/// Websocket close code for a normal shutdown
pub const NORMAL_CLOSE: u16 = 1000;

/// Command sent to a live transcription connection
#[derive(Debug, Clone, PartialEq)]
pub enum SttCommand {
    /// PCM16 audio for the current utterance
    Audio(Bytes),
    /// End of utterance; request a final result
    Finalize,
    /// Close the connection normally
    Close,
}

/// Event raised by a live transcription connection
#[derive(Debug, Clone, PartialEq)]
pub enum SttVendorEvent {
    Transcript {
        text: String,
        confidence: f32,
        is_final: bool,
    },
    /// Connection closed by the vendor or the network
    Closed { code: u16, reason: String },
    /// Non-fatal vendor fault
    Error(String),
}

impl SttVendorEvent {
    /// Whether this close should trigger a reconnect
    pub fn is_abnormal_close(&self) -> bool {
        matches!(self, SttVendorEvent::Closed { code, .. } if *code != NORMAL_CLOSE)
    }
}

/// Channel pair for one transcription connection. The vendor client owns
/// the socket I/O tasks; dropping `commands` closes the connection.
#[derive(Debug)]
pub struct SttConnection {
    pub commands: mpsc::Sender<SttCommand>,
    pub events: mpsc::Receiver<SttVendorEvent>,
}

/// Streaming speech-to-text vendor
#[async_trait]
pub trait SpeechToText: Send + Sync + 'static {
    /// Open a streaming connection. Handshake or auth failures return
    /// `Error::Connection`.
    async fn connect(&self) -> Result<SttConnection>;

    /// Vendor name for logging
    fn name(&self) -> &str;
}

/// Streaming text-to-speech vendor
///
/// `stream` sends PCM16 chunks to `tx` as they arrive and returns once the
/// vendor has finished. Dropping the returned future must release the
/// underlying network request.
#[async_trait]
pub trait TextToSpeech: Send + Sync + 'static {
    async fn stream(&self, text: &str, tx: mpsc::Sender<Bytes>) -> Result<()>;

    /// Output sample rate in Hz
    fn sample_rate(&self) -> u32;

    fn name(&self) -> &str;
}
