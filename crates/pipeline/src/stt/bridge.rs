//! Transcription bridge
//!
//! Owns one streaming recognition connection per session. A supervisor
//! task turns vendor events into [`TranscriptEvent`]s with stable utterance
//! ids and, on an abnormal close, reconnects with exponential backoff.
//! Audio sent while disconnected is dropped rather than buffered.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use voice_session_config::VendorConfig;
use voice_session_core::{
    AudioFrame, Error, SpeechToText, SttCommand, SttConnection, SttVendorEvent, TranscriptEvent,
    NORMAL_CLOSE,
};

use crate::PipelineError;

/// Connection policy
#[derive(Debug, Clone)]
pub struct TranscriptionConfig {
    pub connect_timeout: Duration,
    pub max_reconnect_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self::from(&VendorConfig::default())
    }
}

impl From<&VendorConfig> for TranscriptionConfig {
    fn from(vendors: &VendorConfig) -> Self {
        Self {
            connect_timeout: vendors.connect_timeout(),
            max_reconnect_attempts: vendors.max_reconnect_attempts,
            initial_backoff: vendors.initial_backoff(),
        }
    }
}

/// Events raised by the transcription bridge
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptionEvent {
    /// A background connect finished its handshake
    Connected,
    /// A background connect failed; nothing was opened
    ConnectFailed(Error),
    Transcript(TranscriptEvent),
    /// Recoverable vendor fault; the connection stays up
    Error(Error),
    /// Reconnects exhausted; the bridge is disconnected
    Fatal(Error),
    Reconnected { attempt: u32 },
}

type CommandSink = Arc<Mutex<Option<mpsc::Sender<SttCommand>>>>;

/// Per-session transcription bridge
pub struct TranscriptionBridge<E> {
    vendor: Arc<dyn SpeechToText>,
    config: TranscriptionConfig,
    events: mpsc::Sender<E>,
    sink: CommandSink,
    supervisor: Option<JoinHandle<()>>,
}

impl<E> TranscriptionBridge<E>
where
    E: From<TranscriptionEvent> + Send + 'static,
{
    pub fn new(
        vendor: Arc<dyn SpeechToText>,
        config: TranscriptionConfig,
        events: mpsc::Sender<E>,
    ) -> Self {
        Self {
            vendor,
            config,
            events,
            sink: Arc::new(Mutex::new(None)),
            supervisor: None,
        }
    }

    /// Open the vendor connection. A no-op while connected.
    pub async fn connect(&mut self) -> Result<(), PipelineError> {
        if self.is_connected() {
            return Ok(());
        }
        if let Some(previous) = self.supervisor.take() {
            previous.abort();
        }

        let connection = connect_with_timeout(self.vendor.as_ref(), self.config.connect_timeout)
            .await
            .map_err(|e| PipelineError::Connection(connect_failure(e)))?;

        tracing::info!(vendor = self.vendor.name(), "Transcription connected");
        *self.sink.lock() = Some(connection.commands);

        self.supervisor = Some(tokio::spawn(supervise(
            self.vendor.clone(),
            self.config.clone(),
            self.sink.clone(),
            self.events.clone(),
            connection.events,
        )));
        Ok(())
    }

    /// Open the vendor connection on a spawned task so the caller's event
    /// loop keeps running through the handshake. The outcome arrives as
    /// [`TranscriptionEvent::Connected`] or
    /// [`TranscriptionEvent::ConnectFailed`]. A no-op while connected or
    /// while a previous background connect is still pending.
    pub fn connect_in_background(&mut self) {
        if self.is_connected() || self.is_connecting() {
            return;
        }
        if let Some(previous) = self.supervisor.take() {
            previous.abort();
        }

        let vendor = self.vendor.clone();
        let config = self.config.clone();
        let sink = self.sink.clone();
        let events = self.events.clone();
        self.supervisor = Some(tokio::spawn(async move {
            let connection =
                match connect_with_timeout(vendor.as_ref(), config.connect_timeout).await {
                    Ok(connection) => connection,
                    Err(e) => {
                        let error = Error::Connection(connect_failure(e));
                        tracing::warn!(vendor = vendor.name(), error = %error, "Transcription connect failed");
                        let _ = events.send(TranscriptionEvent::ConnectFailed(error).into()).await;
                        return;
                    }
                };

            tracing::info!(vendor = vendor.name(), "Transcription connected");
            *sink.lock() = Some(connection.commands);
            if events.send(TranscriptionEvent::Connected.into()).await.is_err() {
                return;
            }
            supervise(vendor, config, sink, events, connection.events).await;
        }));
    }

    /// A background connect has not finished its handshake yet
    pub fn is_connecting(&self) -> bool {
        !self.is_connected()
            && self
                .supervisor
                .as_ref()
                .is_some_and(|task| !task.is_finished())
    }

    /// Forward a frame. Dropped when disconnected or when the vendor
    /// cannot keep up.
    pub fn send_audio(&self, frame: &AudioFrame) {
        let sink = self.sink.lock();
        match sink.as_ref() {
            Some(tx) => {
                if tx.try_send(SttCommand::Audio(frame.data.clone())).is_err() {
                    tracing::trace!(sequence = frame.sequence, "STT queue unavailable, dropping frame");
                }
            }
            None => tracing::trace!(sequence = frame.sequence, "STT not connected, dropping frame"),
        }
    }

    /// Request the final result for the current utterance
    pub async fn finalize(&self) -> Result<(), PipelineError> {
        let tx = self.sink.lock().clone().ok_or(PipelineError::NotConnected)?;
        tx.send(SttCommand::Finalize)
            .await
            .map_err(|_| PipelineError::NotConnected)
    }

    /// Close the connection. Safe to call more than once.
    pub fn disconnect(&mut self) {
        if let Some(supervisor) = self.supervisor.take() {
            supervisor.abort();
        }
        if let Some(tx) = self.sink.lock().take() {
            let _ = tx.try_send(SttCommand::Close);
            tracing::debug!(vendor = self.vendor.name(), "Transcription disconnected");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.sink.lock().is_some()
    }
}

impl<E> Drop for TranscriptionBridge<E> {
    fn drop(&mut self) {
        if let Some(supervisor) = self.supervisor.take() {
            supervisor.abort();
        }
    }
}

async fn connect_with_timeout(
    vendor: &dyn SpeechToText,
    timeout: Duration,
) -> voice_session_core::Result<SttConnection> {
    match tokio::time::timeout(timeout, vendor.connect()).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!(
            "{} connect timed out after {:?}",
            vendor.name(),
            timeout
        ))),
    }
}

fn connect_failure(error: Error) -> String {
    match error {
        Error::Connection(msg) | Error::Timeout(msg) => msg,
        other => other.to_string(),
    }
}

async fn supervise<E>(
    vendor: Arc<dyn SpeechToText>,
    config: TranscriptionConfig,
    sink: CommandSink,
    events: mpsc::Sender<E>,
    mut vendor_events: mpsc::Receiver<SttVendorEvent>,
) where
    E: From<TranscriptionEvent> + Send + 'static,
{
    let mut utterance_id: u64 = 0;

    loop {
        let close = loop {
            match vendor_events.recv().await {
                Some(SttVendorEvent::Transcript {
                    text,
                    confidence,
                    is_final,
                }) => {
                    if !is_final && text.trim().is_empty() {
                        continue;
                    }
                    let event = TranscriptEvent {
                        utterance_id,
                        text,
                        confidence,
                        is_final,
                    };
                    if is_final {
                        utterance_id += 1;
                    }
                    if events.send(TranscriptionEvent::Transcript(event).into()).await.is_err() {
                        return;
                    }
                }
                Some(SttVendorEvent::Error(message)) => {
                    tracing::warn!(error = %message, "STT vendor error");
                    let event = TranscriptionEvent::Error(Error::Stream(message));
                    if events.send(event.into()).await.is_err() {
                        return;
                    }
                }
                Some(SttVendorEvent::Closed { code, reason }) => break (code, reason),
                None => break (NORMAL_CLOSE, String::new()),
            }
        };

        sink.lock().take();
        let (code, reason) = close;
        if code == NORMAL_CLOSE {
            tracing::debug!("Transcription stream ended");
            return;
        }
        tracing::warn!(code, reason = %reason, "Transcription connection lost, reconnecting");

        let mut backoff = config.initial_backoff;
        let mut reconnected = None;
        for attempt in 1..=config.max_reconnect_attempts {
            tokio::time::sleep(backoff).await;
            backoff = backoff.saturating_mul(2);

            match connect_with_timeout(vendor.as_ref(), config.connect_timeout).await {
                Ok(connection) => {
                    reconnected = Some((attempt, connection));
                    break;
                }
                Err(e) => tracing::warn!(attempt, error = %e, "STT reconnect attempt failed"),
            }
        }

        let Some((attempt, connection)) = reconnected else {
            let error = Error::Connection(format!(
                "transcription unavailable after {} reconnect attempts",
                config.max_reconnect_attempts
            ));
            tracing::error!(error = %error, "Giving up on transcription");
            let _ = events.send(TranscriptionEvent::Fatal(error).into()).await;
            return;
        };

        tracing::info!(attempt, "Transcription reconnected");
        *sink.lock() = Some(connection.commands);
        vendor_events = connection.events;
        if events
            .send(TranscriptionEvent::Reconnected { attempt }.into())
            .await
            .is_err()
        {
            return;
        }
    }
}
