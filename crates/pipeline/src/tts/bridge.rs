//! Synthesis bridge
//!
//! At most one synthesis stream is active. Text submitted while a stream
//! is playing or while the bridge is paused is queued and played in FIFO
//! order. `pause()` and `stop()` cancel the in-flight vendor request by
//! dropping its future; the stream task reports that as
//! [`Error::Cancelled`], which is logged and never emitted as an error.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use voice_session_core::{Error, SynthesisChunk, TextToSpeech};

/// Events raised by synthesis streams, tagged with the stream they belong to
#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisEvent {
    Chunk { stream_id: u64, chunk: SynthesisChunk },
    Complete { stream_id: u64 },
    Error { stream_id: u64, error: Error },
}

impl SynthesisEvent {
    pub fn stream_id(&self) -> u64 {
        match self {
            SynthesisEvent::Chunk { stream_id, .. }
            | SynthesisEvent::Complete { stream_id }
            | SynthesisEvent::Error { stream_id, .. } => *stream_id,
        }
    }
}

/// What `synthesize` did with the text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisStart {
    Started(u64),
    Queued,
}

struct ActiveStream {
    id: u64,
    text: String,
    cancel: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

/// Per-session synthesis bridge
pub struct SynthesisBridge<E> {
    vendor: Arc<dyn TextToSpeech>,
    events: mpsc::Sender<E>,
    active: Option<ActiveStream>,
    queue: VecDeque<String>,
    paused: bool,
    next_stream_id: u64,
    /// Chunk sequence, continuous across the streams of one response
    sequence: Arc<AtomicU64>,
}

impl<E> SynthesisBridge<E>
where
    E: From<SynthesisEvent> + Send + 'static,
{
    pub fn new(vendor: Arc<dyn TextToSpeech>, events: mpsc::Sender<E>) -> Self {
        Self {
            vendor,
            events,
            active: None,
            queue: VecDeque::new(),
            paused: false,
            next_stream_id: 1,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start synthesizing `text`, or queue it while paused or busy
    pub fn synthesize(&mut self, text: impl Into<String>) -> SynthesisStart {
        let text = text.into();
        if self.paused || self.active.is_some() {
            tracing::trace!(queued = self.queue.len() + 1, "Queueing synthesis text");
            self.queue.push_back(text);
            return SynthesisStart::Queued;
        }
        SynthesisStart::Started(self.start_stream(text))
    }

    /// Hard-cancel the active stream and hold the queue
    pub fn pause(&mut self) {
        self.paused = true;
        if let Some(stream) = self.active.take() {
            tracing::debug!(stream_id = stream.id, "Pausing synthesis, cancelling active stream");
            Self::cancel(stream);
        }
    }

    /// Leave the paused state and start the next queued text, if any
    pub fn resume(&mut self) -> Option<u64> {
        self.paused = false;
        if self.active.is_some() {
            return None;
        }
        self.start_next()
    }

    /// Cancel the active stream and discard everything queued
    pub fn stop(&mut self) {
        self.queue.clear();
        self.paused = false;
        self.sequence.store(0, Ordering::Relaxed);
        if let Some(stream) = self.active.take() {
            tracing::debug!(stream_id = stream.id, "Stopping synthesis");
            Self::cancel(stream);
        }
    }

    /// Record the end of a stream (complete or failed) and move on to the
    /// next queued text. Events from superseded streams are ignored.
    pub fn on_stream_finished(&mut self, stream_id: u64) -> Option<u64> {
        if !self.is_current(stream_id) {
            return None;
        }
        self.active = None;
        if self.paused {
            return None;
        }
        self.start_next()
    }

    /// Whether events tagged `stream_id` belong to the active stream
    pub fn is_current(&self, stream_id: u64) -> bool {
        self.active.as_ref().map(|s| s.id) == Some(stream_id)
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Whether anything is playing or waiting to play
    pub fn has_pending(&self) -> bool {
        self.active.is_some() || !self.queue.is_empty()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Text of the active stream
    pub fn active_text(&self) -> Option<&str> {
        self.active.as_ref().map(|s| s.text.as_str())
    }

    pub fn sample_rate(&self) -> u32 {
        self.vendor.sample_rate()
    }

    fn start_next(&mut self) -> Option<u64> {
        let text = self.queue.pop_front()?;
        Some(self.start_stream(text))
    }

    fn start_stream(&mut self, text: String) -> u64 {
        if let Some(previous) = self.active.take() {
            Self::cancel(previous);
        }

        let id = self.next_stream_id;
        self.next_stream_id += 1;

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let handle = tokio::spawn(run_stream(
            id,
            text.clone(),
            self.vendor.clone(),
            self.events.clone(),
            self.sequence.clone(),
            cancel_rx,
        ));

        tracing::debug!(stream_id = id, vendor = self.vendor.name(), chars = text.len(), "Synthesis stream started");
        self.active = Some(ActiveStream {
            id,
            text,
            cancel: Some(cancel_tx),
            handle,
        });
        id
    }

    fn cancel(mut stream: ActiveStream) {
        if let Some(cancel) = stream.cancel.take() {
            // The task may already have finished
            let _ = cancel.send(());
        }
    }
}

impl<E> Drop for SynthesisBridge<E> {
    fn drop(&mut self) {
        if let Some(stream) = self.active.take() {
            stream.handle.abort();
        }
    }
}

async fn run_stream<E>(
    stream_id: u64,
    text: String,
    vendor: Arc<dyn TextToSpeech>,
    events: mpsc::Sender<E>,
    sequence: Arc<AtomicU64>,
    mut cancel_rx: oneshot::Receiver<()>,
) where
    E: From<SynthesisEvent> + Send + 'static,
{
    let sample_rate = vendor.sample_rate();
    let (audio_tx, audio_rx) = mpsc::channel::<Bytes>(32);

    let produce = vendor.stream(&text, audio_tx);
    let forward = async {
        // Owned here so an early exit also fails the vendor's sends
        let mut audio_rx = audio_rx;
        while let Some(audio) = audio_rx.recv().await {
            if audio.is_empty() {
                continue;
            }
            let chunk = SynthesisChunk {
                audio,
                sequence: sequence.fetch_add(1, Ordering::Relaxed),
                sample_rate,
            };
            if events
                .send(SynthesisEvent::Chunk { stream_id, chunk }.into())
                .await
                .is_err()
            {
                break;
            }
        }
    };

    // Dropping the joined future on cancel releases the vendor request
    let result = tokio::select! {
        biased;
        _ = &mut cancel_rx => Err(Error::Cancelled),
        (result, ()) = futures::future::join(produce, forward) => result,
    };

    let event = match result {
        Ok(()) => SynthesisEvent::Complete { stream_id },
        Err(e) if e.is_cancelled() => {
            tracing::debug!(stream_id, "Synthesis stream cancelled");
            return;
        }
        Err(error) => {
            tracing::warn!(stream_id, error = %error, "Synthesis stream failed");
            SynthesisEvent::Error { stream_id, error }
        }
    };
    let _ = events.send(event.into()).await;
}
