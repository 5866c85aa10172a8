//! Session coordinator
//!
//! One coordinator owns all mutable state of a voice session and consumes a
//! single ordered event queue. The websocket reader, the three vendor
//! bridges and spawned function calls all produce onto that queue, so a
//! barge-in can never race a synthesis completion or a response chunk.
//!
//! ```text
//! Unauthenticated --auth--> Idle --audio.start--> Listening
//!       Listening --final transcript--> Thinking --first chunk--> Speaking
//!       Speaking --barge-in--> Listening
//!       Speaking --synthesis drained--> Idle | Listening
//!       any --disconnect | expiry--> Closed
//! ```

use bytes::Bytes;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use voice_session_core::{
    AudioFrame, AuditEvent, ClientMessage, Error, FunctionCallRequest, FunctionCallResult,
    GenerationOutcome, InboundFrame, ResponseChunk, ServerMessage, TranscriptEvent,
};
use voice_session_pipeline::{
    AudioFramer, BargeInDetector, PipelineError, ResponseEvent, ResponseStreamBridge,
    SynthesisBridge, SynthesisEvent, SynthesisStart, TranscriptionBridge, TranscriptionConfig,
    TranscriptionEvent,
};

use crate::metrics;
use crate::session::Session;
use crate::state::AppState;

const APOLOGY: &str = "Sorry, I couldn't finish that response. Please try again.";

/// Session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Idle,
    Listening,
    Thinking,
    Speaking,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::Idle => "idle",
            SessionState::Listening => "listening",
            SessionState::Thinking => "thinking",
            SessionState::Speaking => "speaking",
            SessionState::Closed => "closed",
        }
    }

    fn is_responding(&self) -> bool {
        matches!(self, SessionState::Thinking | SessionState::Speaking)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the coordinator reacts to
#[derive(Debug)]
pub enum SessionEvent {
    /// Classified payload from the client transport
    Inbound(InboundFrame),
    Transcription(TranscriptionEvent),
    Response(ResponseEvent),
    Synthesis(SynthesisEvent),
    /// Result of a model-requested function call
    FunctionResult(FunctionCallResult),
    /// Client transport closed
    Disconnected,
}

impl From<TranscriptionEvent> for SessionEvent {
    fn from(event: TranscriptionEvent) -> Self {
        SessionEvent::Transcription(event)
    }
}

impl From<ResponseEvent> for SessionEvent {
    fn from(event: ResponseEvent) -> Self {
        SessionEvent::Response(event)
    }
}

impl From<SynthesisEvent> for SessionEvent {
    fn from(event: SynthesisEvent) -> Self {
        SessionEvent::Synthesis(event)
    }
}

/// Vendor bridges, created on the first `audio.start`
struct Bridges {
    transcription: TranscriptionBridge<SessionEvent>,
    response: ResponseStreamBridge<SessionEvent>,
    synthesis: SynthesisBridge<SessionEvent>,
}

enum Wake {
    Closed,
    Event(Option<SessionEvent>),
}

/// Per-connection session state machine
pub struct SessionCoordinator {
    app: AppState,
    events_tx: mpsc::Sender<SessionEvent>,
    events_rx: mpsc::Receiver<SessionEvent>,
    outbound: mpsc::Sender<ServerMessage>,

    state: SessionState,
    session: Option<Arc<Session>>,
    shutdown: Option<watch::Receiver<bool>>,
    bridges: Option<Bridges>,

    framer: AudioFramer,
    barge_in: BargeInDetector,
    recording: bool,
    /// Synthesis failed during the current turn; text only until it ends
    silent: bool,

    /// Latest generation of the current turn
    generation: Option<u64>,
    /// Generation interrupted by a barge-in; its chunks are not spoken
    suppressed: Option<u64>,
    /// Final transcript held while an interrupted generation finishes
    pending_utterance: Option<String>,
    turn_started: Option<Instant>,
}

impl SessionCoordinator {
    pub fn new(
        app: AppState,
        events_tx: mpsc::Sender<SessionEvent>,
        events_rx: mpsc::Receiver<SessionEvent>,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> Result<Self, PipelineError> {
        let pipeline = &app.settings.pipeline;
        let framer = AudioFramer::new(&pipeline.audio)?;
        let barge_in = BargeInDetector::new(pipeline.barge_in.clone(), pipeline.vad.clone());

        Ok(Self {
            app,
            events_tx,
            events_rx,
            outbound,
            state: SessionState::Unauthenticated,
            session: None,
            shutdown: None,
            bridges: None,
            framer,
            barge_in,
            recording: false,
            silent: false,
            generation: None,
            suppressed: None,
            pending_utterance: None,
            turn_started: None,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Process events until the client disconnects or the session expires
    pub async fn run(mut self) {
        tracing::debug!("Session coordinator started");

        loop {
            let wake = tokio::select! {
                biased;
                _ = wait_closed(&mut self.shutdown) => Wake::Closed,
                event = self.events_rx.recv() => Wake::Event(event),
            };

            match wake {
                Wake::Closed => {
                    self.close("expired").await;
                    break;
                }
                Wake::Event(None) | Wake::Event(Some(SessionEvent::Disconnected)) => {
                    self.close("disconnected").await;
                    break;
                }
                Wake::Event(Some(event)) => self.handle(event).await,
            }
        }
    }

    async fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Inbound(frame) => {
                if let Some(session) = &self.session {
                    session.touch();
                }
                self.on_inbound(frame).await;
            }
            SessionEvent::Transcription(event) => self.on_transcription(event).await,
            SessionEvent::Response(event) => self.on_response(event).await,
            SessionEvent::Synthesis(event) => self.on_synthesis(event).await,
            SessionEvent::FunctionResult(result) => self.on_function_result(result),
            SessionEvent::Disconnected => {}
        }
    }

    // ---------------------------------------------------------------
    // Client transport
    // ---------------------------------------------------------------

    async fn on_inbound(&mut self, frame: InboundFrame) {
        match frame {
            InboundFrame::Control(message) => self.on_control(message).await,
            InboundFrame::Audio(data) => self.on_audio(data).await,
            InboundFrame::Invalid(err) => {
                tracing::warn!(session_id = %self.session_id(), error = %err, "Rejected control message");
                metrics::record_error(&err);
                self.send(ServerMessage::error(&err)).await;
            }
        }
    }

    async fn on_control(&mut self, message: ClientMessage) {
        if self.state == SessionState::Unauthenticated
            && !matches!(message, ClientMessage::Auth { .. })
        {
            let err = Error::Validation("authenticate before sending control messages".into());
            self.send(ServerMessage::error(&err)).await;
            return;
        }

        match message {
            ClientMessage::Auth { token } => self.authenticate(&token).await,
            ClientMessage::AudioStart => self.start_audio().await,
            ClientMessage::AudioStop => self.stop_audio().await,
            ClientMessage::Interrupt => {
                if self.state == SessionState::Speaking {
                    self.barge_in("client").await;
                } else {
                    tracing::debug!(state = %self.state, "Interrupt ignored outside speaking");
                }
            }
        }
    }

    async fn authenticate(&mut self, token: &str) {
        if self.state != SessionState::Unauthenticated {
            let err = Error::Validation("session already authenticated".into());
            self.send(ServerMessage::error(&err)).await;
            return;
        }

        let created = self
            .app
            .auth
            .verify(token)
            .and_then(|()| self.app.sessions.create());

        match created {
            Ok(session) => {
                let session_id = session.id.clone();
                self.shutdown = Some(session.subscribe());
                self.session = Some(session);
                self.audit(AuditEvent::SessionStarted {
                    session_id: session_id.clone(),
                });
                self.set_state(SessionState::Idle);
                self.send(ServerMessage::Status {
                    state: self.state.as_str().to_string(),
                    session_id: Some(session_id),
                    detail: None,
                })
                .await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "Session authentication failed");
                self.send(ServerMessage::Error {
                    code: err.code().to_string(),
                    message: err.to_string(),
                })
                .await;
            }
        }
    }

    async fn start_audio(&mut self) {
        self.ensure_bridges();
        self.framer.reset();
        self.recording = true;

        if self.state == SessionState::Idle {
            self.transition(SessionState::Listening, None).await;
        }

        if let Some(bridges) = self.bridges.as_mut() {
            bridges.transcription.connect_in_background();
        }
    }

    async fn stop_audio(&mut self) {
        if let Some(frame) = self.framer.flush() {
            self.process_frame(frame).await;
        }
        self.recording = false;

        if let Some(bridges) = &self.bridges {
            if bridges.transcription.is_connected() {
                if let Err(e) = bridges.transcription.finalize().await {
                    tracing::debug!(error = %e, "Finalize skipped");
                }
            }
        }

        if self.state == SessionState::Listening {
            self.transition(SessionState::Idle, None).await;
        }
    }

    async fn on_audio(&mut self, data: Bytes) {
        if self.state == SessionState::Unauthenticated {
            tracing::debug!(bytes = data.len(), "Dropping audio before authentication");
            return;
        }
        if !self.recording {
            tracing::trace!(bytes = data.len(), "Dropping audio outside recording");
            return;
        }

        for frame in self.framer.push(&data) {
            self.process_frame(frame).await;
        }
    }

    async fn process_frame(&mut self, frame: AudioFrame) {
        if let Some(bridges) = &self.bridges {
            bridges.transcription.send_audio(&frame);
        }

        let result = self.barge_in.process(&frame);
        if result.should_barge_in && self.state == SessionState::Speaking {
            self.barge_in("vad").await;
        }
    }

    /// Stop speaking and listen again. The in-flight generation keeps
    /// running so the conversation history stays complete.
    async fn barge_in(&mut self, source: &'static str) {
        tracing::info!(session_id = %self.session_id(), source, "Barge-in");
        metrics::record_barge_in(source);

        if let Some(bridges) = self.bridges.as_mut() {
            bridges.synthesis.pause();
            if bridges.response.is_busy() {
                self.suppressed = self.generation;
            }
        }
        self.barge_in.reset();
        self.turn_started = None;
        self.transition(SessionState::Listening, Some("barge_in")).await;
    }

    // ---------------------------------------------------------------
    // Transcription
    // ---------------------------------------------------------------

    async fn on_transcription(&mut self, event: TranscriptionEvent) {
        match event {
            TranscriptionEvent::Transcript(transcript) => {
                self.send(ServerMessage::transcript(&transcript)).await;
                if transcript.is_final && !transcript.text.trim().is_empty() {
                    self.on_final_transcript(transcript).await;
                }
            }
            TranscriptionEvent::Error(err) => {
                tracing::warn!(session_id = %self.session_id(), error = %err, "Transcription fault");
                metrics::record_error(&err);
                self.send(ServerMessage::error(&err)).await;
            }
            TranscriptionEvent::Connected => {
                tracing::debug!(session_id = %self.session_id(), "Transcription ready");
            }
            TranscriptionEvent::ConnectFailed(err) => {
                tracing::error!(session_id = %self.session_id(), error = %err, "Transcription unavailable");
                metrics::record_error(&err);
                self.send(ServerMessage::error(&err)).await;
                self.send(ServerMessage::status_with_detail(self.state.as_str(), "text_only"))
                    .await;
            }
            TranscriptionEvent::Fatal(err) => {
                tracing::error!(session_id = %self.session_id(), error = %err, "Transcription lost");
                metrics::record_error(&err);
                self.send(ServerMessage::error(&err)).await;
                self.send(ServerMessage::status_with_detail(self.state.as_str(), "text_only"))
                    .await;
            }
            TranscriptionEvent::Reconnected { attempt } => {
                tracing::info!(session_id = %self.session_id(), attempt, "Transcription recovered");
                metrics::record_stt_reconnect();
            }
        }
    }

    async fn on_final_transcript(&mut self, transcript: TranscriptEvent) {
        if matches!(self.state, SessionState::Unauthenticated | SessionState::Closed) {
            return;
        }

        self.audit(AuditEvent::InteractionChecked {
            session_id: self.session_id().to_string(),
            utterance_id: transcript.utterance_id,
        });

        if self.state == SessionState::Speaking {
            self.barge_in("transcript").await;
        }
        self.start_turn(transcript.text).await;
    }

    async fn start_turn(&mut self, text: String) {
        let Some(bridges) = self.bridges.as_mut() else {
            return;
        };

        if bridges.response.is_busy() {
            let pending = self.pending_utterance.get_or_insert_with(String::new);
            if !pending.is_empty() {
                pending.push(' ');
            }
            pending.push_str(&text);
            tracing::debug!(session_id = %self.session_id(), "Generation in flight, holding utterance");
            return;
        }

        bridges.synthesis.stop();
        match bridges.response.send_message(text) {
            Ok(generation_id) => {
                self.generation = Some(generation_id);
                self.suppressed = None;
                self.silent = false;
                self.turn_started = Some(Instant::now());
                self.transition(SessionState::Thinking, None).await;
            }
            Err(e) => {
                let err = Error::from(e);
                tracing::warn!(session_id = %self.session_id(), error = %err, "Could not start generation");
                self.send(ServerMessage::error(&err)).await;
            }
        }
    }

    // ---------------------------------------------------------------
    // Response stream
    // ---------------------------------------------------------------

    async fn on_response(&mut self, event: ResponseEvent) {
        let generation_id = event.generation_id();
        let current = self
            .bridges
            .as_ref()
            .is_some_and(|b| b.response.is_current(generation_id));
        if !current {
            tracing::trace!(generation_id, "Dropping stale response event");
            return;
        }

        match event {
            ResponseEvent::Delta { text, .. } => {
                self.send(ServerMessage::LlmPartial { text }).await;
            }
            ResponseEvent::Chunk { chunk, .. } => self.on_response_chunk(generation_id, chunk).await,
            ResponseEvent::Finished { outcome, .. } => {
                self.on_generation_finished(generation_id, outcome).await;
            }
            ResponseEvent::Error { error, .. } => {
                self.on_generation_failed(generation_id, error).await;
            }
        }
    }

    async fn on_response_chunk(&mut self, generation_id: u64, chunk: ResponseChunk) {
        if let Some(call) = &chunk.function_call {
            tracing::debug!(function = %call.name, call_id = %call.id, "Function call requested");
            return;
        }
        if !chunk.is_speakable() || self.silent || self.suppressed == Some(generation_id) {
            return;
        }
        let Some(bridges) = self.bridges.as_mut() else {
            return;
        };

        match bridges.synthesis.synthesize(chunk.text) {
            SynthesisStart::Started(stream_id) => tracing::debug!(stream_id, "Speaking sentence"),
            SynthesisStart::Queued => tracing::trace!("Sentence queued for synthesis"),
        }
        if self.state == SessionState::Thinking {
            self.transition(SessionState::Speaking, None).await;
        }
    }

    async fn on_generation_finished(&mut self, generation_id: u64, outcome: GenerationOutcome) {
        let Some(bridges) = self.bridges.as_mut() else {
            return;
        };

        if bridges.response.on_generation_finished(generation_id, &outcome) > 0 {
            for call in outcome.function_calls {
                self.invoke_function(call);
            }
            return;
        }

        let interrupted = self.suppressed == Some(generation_id);
        if interrupted {
            self.suppressed = None;
        }
        if let Some(text) = self.pending_utterance.take() {
            self.start_turn(text).await;
            return;
        }
        if !interrupted {
            self.maybe_finish_turn().await;
        }
    }

    async fn on_generation_failed(&mut self, generation_id: u64, error: Error) {
        if let Some(bridges) = self.bridges.as_mut() {
            bridges.response.on_generation_failed(generation_id);
        }
        if error.is_cancelled() {
            return;
        }

        tracing::warn!(session_id = %self.session_id(), generation_id, error = %error, "Response failed");
        metrics::record_error(&error);
        self.send(ServerMessage::Error {
            code: error.kind().to_string(),
            message: APOLOGY.to_string(),
        })
        .await;

        let interrupted = self.suppressed == Some(generation_id);
        if interrupted {
            self.suppressed = None;
        }
        if let Some(text) = self.pending_utterance.take() {
            self.start_turn(text).await;
            return;
        }
        if !interrupted && self.state.is_responding() {
            if let Some(bridges) = self.bridges.as_mut() {
                bridges.synthesis.stop();
            }
            self.finish_turn().await;
        }
    }

    fn invoke_function(&self, call: FunctionCallRequest) {
        tracing::info!(session_id = %self.session_id(), function = %call.name, "Invoking function");
        self.audit(AuditEvent::FunctionInvoked {
            session_id: self.session_id().to_string(),
            name: call.name.clone(),
        });

        let functions = self.app.services.functions.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = match functions.execute(&call).await {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(function = %call.name, error = %e, "Function execution failed");
                    json!({ "error": e.to_string() })
                }
            };
            let result = FunctionCallResult {
                id: call.id,
                name: call.name,
                result,
            };
            let _ = events.send(SessionEvent::FunctionResult(result)).await;
        });
    }

    fn on_function_result(&mut self, result: FunctionCallResult) {
        let Some(bridges) = self.bridges.as_mut() else {
            return;
        };

        match bridges.response.handle_function_result(result) {
            Ok(Some(generation_id)) => {
                // A continuation of an interrupted turn stays silent
                if self.suppressed.is_some() {
                    self.suppressed = Some(generation_id);
                }
                self.generation = Some(generation_id);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Discarding function result"),
        }
    }

    // ---------------------------------------------------------------
    // Synthesis
    // ---------------------------------------------------------------

    async fn on_synthesis(&mut self, event: SynthesisEvent) {
        let stream_id = event.stream_id();
        let Some(bridges) = self.bridges.as_mut() else {
            return;
        };
        if !bridges.synthesis.is_current(stream_id) {
            tracing::trace!(stream_id, "Dropping stale synthesis event");
            return;
        }

        match event {
            SynthesisEvent::Chunk { chunk, .. } => {
                if let Some(started) = self.turn_started.take() {
                    metrics::record_first_audio_latency(started.elapsed().as_secs_f64());
                }
                self.send(ServerMessage::tts_chunk(&chunk)).await;
            }
            SynthesisEvent::Complete { .. } => {
                if bridges.synthesis.on_stream_finished(stream_id).is_none() {
                    self.maybe_finish_turn().await;
                }
            }
            SynthesisEvent::Error { error, .. } => {
                bridges.synthesis.on_stream_finished(stream_id);
                bridges.synthesis.stop();
                self.silent = true;

                tracing::warn!(session_id = %self.session_id(), stream_id, error = %error, "Synthesis failed, continuing silently");
                metrics::record_error(&error);
                self.send(ServerMessage::error(&error)).await;
                self.send(ServerMessage::status_with_detail(self.state.as_str(), "silent"))
                    .await;
                self.maybe_finish_turn().await;
            }
        }
    }

    // ---------------------------------------------------------------
    // Turn and lifecycle
    // ---------------------------------------------------------------

    /// End the turn once neither the model nor synthesis has work left
    async fn maybe_finish_turn(&mut self) {
        if !self.state.is_responding() {
            return;
        }
        let idle = self
            .bridges
            .as_ref()
            .map_or(true, |b| !b.response.is_busy() && !b.synthesis.has_pending());
        if idle {
            self.finish_turn().await;
        }
    }

    async fn finish_turn(&mut self) {
        if self.state == SessionState::Speaking {
            self.send(ServerMessage::TtsEnd).await;
        }
        self.turn_started = None;
        let next = if self.recording {
            SessionState::Listening
        } else {
            SessionState::Idle
        };
        self.transition(next, None).await;
    }

    fn ensure_bridges(&mut self) {
        if self.bridges.is_some() {
            return;
        }

        let services = &self.app.services;
        let settings = &self.app.settings;
        let mut response = ResponseStreamBridge::new(
            services.llm.clone(),
            settings.pipeline.sentence.clone(),
            settings.session.system_prompt.clone(),
            services.tools.clone(),
            self.events_tx.clone(),
        );
        response.start_conversation();

        self.bridges = Some(Bridges {
            transcription: TranscriptionBridge::new(
                services.stt.clone(),
                TranscriptionConfig::from(&settings.vendors),
                self.events_tx.clone(),
            ),
            response,
            synthesis: SynthesisBridge::new(services.tts.clone(), self.events_tx.clone()),
        });
        tracing::debug!(session_id = %self.session_id(), "Session bridges created");
    }

    /// Tear everything down. Safe to call more than once.
    async fn close(&mut self, reason: &str) {
        if self.state == SessionState::Closed {
            return;
        }

        if let Some(mut bridges) = self.bridges.take() {
            bridges.transcription.disconnect();
            bridges.response.cancel();
            bridges.synthesis.stop();
        }
        if let Some(session) = self.session.take() {
            self.app.sessions.remove(&session.id);
            self.audit(AuditEvent::SessionClosed {
                session_id: session.id.clone(),
                reason: reason.to_string(),
            });
            tracing::info!(session_id = %session.id, reason, "Session closed");
        }

        self.set_state(SessionState::Closed);
        self.send(ServerMessage::status_with_detail(self.state.as_str(), reason))
            .await;
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        tracing::info!(
            session_id = %self.session_id(),
            from = %self.state,
            to = %next,
            "Session state changed"
        );
        self.state = next;
        self.barge_in.set_playing_tts(next == SessionState::Speaking);
    }

    async fn transition(&mut self, next: SessionState, detail: Option<&str>) {
        let changed = self.state != next;
        self.set_state(next);
        if changed || detail.is_some() {
            let message = match detail {
                Some(detail) => ServerMessage::status_with_detail(next.as_str(), detail),
                None => ServerMessage::status(next.as_str()),
            };
            self.send(message).await;
        }
    }

    /// Audit is fire-and-forget; a failing sink never affects the session
    fn audit(&self, event: AuditEvent) {
        let sink = self.app.services.audit.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.record(event).await {
                tracing::warn!(error = %e, "Audit sink failed");
            }
        });
    }

    async fn send(&self, message: ServerMessage) {
        if self.outbound.send(message).await.is_err() {
            tracing::trace!("Client transport gone, dropping message");
        }
    }

    fn session_id(&self) -> &str {
        self.session.as_ref().map_or("-", |s| s.id.as_str())
    }
}

async fn wait_closed(shutdown: &mut Option<watch::Receiver<bool>>) {
    if let Some(rx) = shutdown {
        if rx.wait_for(|closed| *closed).await.is_ok() {
            return;
        }
    }
    std::future::pending::<()>().await
}
