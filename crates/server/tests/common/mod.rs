//! Mock vendors and a harness driving a coordinator over its channels

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use voice_session_config::Settings;
use voice_session_core::audio::f32_to_pcm16;
use voice_session_core::{
    ClientMessage, Error, FinishReason, FunctionCallRequest, GenerateRequest, GenerationOutcome,
    InboundFrame, LanguageModel, Result, ServerMessage, SpeechToText, SttConnection,
    SttVendorEvent, TextToSpeech,
};
use voice_session_server::{
    AppState, BuiltinFunctions, SessionCoordinator, SessionEvent, SessionServices,
    TracingAuditSink,
};

// ---------------------------------------------------------------------------
// Transcription
// ---------------------------------------------------------------------------

pub struct MockStt {
    fail: bool,
    stall: bool,
    links: mpsc::UnboundedSender<mpsc::Sender<SttVendorEvent>>,
}

impl MockStt {
    /// Each successful connect hands the test its vendor event sender
    pub fn new() -> (Self, mpsc::UnboundedReceiver<mpsc::Sender<SttVendorEvent>>) {
        let (links, rx) = mpsc::unbounded_channel();
        (
            Self {
                fail: false,
                stall: false,
                links,
            },
            rx,
        )
    }

    pub fn refusing() -> Self {
        let (links, _) = mpsc::unbounded_channel();
        Self {
            fail: true,
            stall: false,
            links,
        }
    }

    /// Never completes the handshake
    pub fn stalling() -> Self {
        let (links, _) = mpsc::unbounded_channel();
        Self {
            fail: false,
            stall: true,
            links,
        }
    }
}

#[async_trait]
impl SpeechToText for MockStt {
    async fn connect(&self) -> Result<SttConnection> {
        if self.stall {
            futures::future::pending::<()>().await;
        }
        if self.fail {
            return Err(Error::Connection("handshake refused".into()));
        }
        let (commands, mut command_rx) = mpsc::channel(64);
        let (event_tx, events) = mpsc::channel(64);
        tokio::spawn(async move { while command_rx.recv().await.is_some() {} });
        let _ = self.links.send(event_tx);
        Ok(SttConnection { commands, events })
    }

    fn name(&self) -> &str {
        "mock-stt"
    }
}

pub fn final_transcript(text: &str) -> SttVendorEvent {
    SttVendorEvent::Transcript {
        text: text.to_string(),
        confidence: 0.93,
        is_final: true,
    }
}

// ---------------------------------------------------------------------------
// Language model
// ---------------------------------------------------------------------------

pub struct Script {
    pub deltas: Vec<&'static str>,
    pub calls: Vec<FunctionCallRequest>,
    /// Wait on the gate before sending the delta at this index
    pub hold: Option<(usize, Arc<Notify>)>,
}

impl Script {
    pub fn text(deltas: &[&'static str]) -> Self {
        Self {
            deltas: deltas.to_vec(),
            calls: Vec::new(),
            hold: None,
        }
    }

    pub fn call(call: FunctionCallRequest) -> Self {
        Self {
            deltas: Vec::new(),
            calls: vec![call],
            hold: None,
        }
    }

    /// Stream `deltas`, stalling before `index` until `gate` is notified
    pub fn held(deltas: &[&'static str], index: usize, gate: Arc<Notify>) -> Self {
        Self {
            hold: Some((index, gate)),
            ..Self::text(deltas)
        }
    }
}

pub struct ScriptedLlm {
    scripts: Mutex<Vec<Script>>,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedLlm {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    async fn stream(
        &self,
        request: &GenerateRequest,
        tx: mpsc::Sender<String>,
    ) -> Result<GenerationOutcome> {
        self.requests.lock().push(request.clone());
        let script = {
            let mut scripts = self.scripts.lock();
            if scripts.is_empty() {
                Script::text(&["Okay, noted."])
            } else {
                scripts.remove(0)
            }
        };

        let mut text = String::new();
        for (index, delta) in script.deltas.into_iter().enumerate() {
            if let Some((hold_at, gate)) = &script.hold {
                if *hold_at == index {
                    gate.notified().await;
                }
            }
            text.push_str(delta);
            if tx.send(delta.to_string()).await.is_err() {
                return Err(Error::Cancelled);
            }
        }

        Ok(GenerationOutcome {
            text,
            finish_reason: if script.calls.is_empty() {
                FinishReason::Stop
            } else {
                FinishReason::ToolCalls
            },
            function_calls: script.calls,
        })
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

// ---------------------------------------------------------------------------
// Synthesis
// ---------------------------------------------------------------------------

struct ReleaseGuard(Arc<AtomicUsize>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Copy, PartialEq)]
pub enum TtsMode {
    /// Emit the chunks, then never finish
    Stall,
    /// Emit the chunks and complete
    Finish,
    /// Fail before any audio
    Fail,
}

pub struct MockTts {
    mode: TtsMode,
    chunks: usize,
    pub calls: AtomicUsize,
    pub released: Arc<AtomicUsize>,
}

impl MockTts {
    pub fn new(mode: TtsMode, chunks: usize) -> Arc<Self> {
        Arc::new(Self {
            mode,
            chunks,
            calls: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
        })
    }
}

#[async_trait]
impl TextToSpeech for MockTts {
    async fn stream(&self, _text: &str, tx: mpsc::Sender<Bytes>) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _guard = ReleaseGuard(self.released.clone());

        if self.mode == TtsMode::Fail {
            return Err(Error::Stream("synthesis backend reset".into()));
        }
        for _ in 0..self.chunks {
            if tx.send(Bytes::from(vec![0u8; 640])).await.is_err() {
                return Err(Error::Cancelled);
            }
        }
        if self.mode == TtsMode::Stall {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        16000
    }

    fn name(&self) -> &str {
        "mock-tts"
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub fn app_state(
    settings: Settings,
    stt: MockStt,
    llm: Arc<ScriptedLlm>,
    tts: Arc<MockTts>,
) -> AppState {
    let functions = BuiltinFunctions::with_defaults();
    let tools = functions.definitions();
    AppState::new(
        settings,
        SessionServices {
            stt: Arc::new(stt),
            llm,
            tts,
            functions: Arc::new(functions),
            tools,
            audit: Arc::new(TracingAuditSink),
        },
    )
}

pub struct Harness {
    pub state: AppState,
    pub events: mpsc::Sender<SessionEvent>,
    pub outbound: mpsc::Receiver<ServerMessage>,
    pub task: JoinHandle<()>,
}

impl Harness {
    pub fn start(state: AppState) -> Self {
        let (events, events_rx) = mpsc::channel(256);
        let (outbound_tx, outbound) = mpsc::channel(256);
        let coordinator =
            SessionCoordinator::new(state.clone(), events.clone(), events_rx, outbound_tx)
                .unwrap();
        let task = tokio::spawn(coordinator.run());
        Self {
            state,
            events,
            outbound,
            task,
        }
    }

    pub async fn control(&self, message: ClientMessage) {
        self.events
            .send(SessionEvent::Inbound(InboundFrame::Control(message)))
            .await
            .unwrap();
    }

    pub async fn audio(&self, data: Bytes) {
        self.events
            .send(SessionEvent::Inbound(InboundFrame::Audio(data)))
            .await
            .unwrap();
    }

    /// Skip messages until one matches
    pub async fn wait_for<F>(&mut self, what: &str, matches: F) -> ServerMessage
    where
        F: Fn(&ServerMessage) -> bool,
    {
        let result = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match self.outbound.recv().await {
                    Some(message) if matches(&message) => return message,
                    Some(_) => continue,
                    None => panic!("coordinator ended while waiting for {}", what),
                }
            }
        })
        .await;
        result.unwrap_or_else(|_| panic!("timed out waiting for {}", what))
    }

    pub async fn wait_for_status(&mut self, state: &str, detail: Option<&str>) -> ServerMessage {
        let what = format!("status {} {:?}", state, detail);
        self.wait_for(&what, |m| {
            matches!(m, ServerMessage::Status { state: s, detail: d, .. }
                if s == state && d.as_deref() == detail)
        })
        .await
    }

    pub async fn wait_for_error(&mut self, code: &str) -> ServerMessage {
        self.wait_for(&format!("error {}", code), |m| {
            matches!(m, ServerMessage::Error { code: c, .. } if c == code)
        })
        .await
    }

    /// Authenticate and return the session id
    pub async fn authenticate(&mut self, token: &str) -> String {
        self.control(ClientMessage::Auth {
            token: token.to_string(),
        })
        .await;
        match self.wait_for_status("idle", None).await {
            ServerMessage::Status {
                session_id: Some(id),
                ..
            } => id,
            other => panic!("expected session id, got {:?}", other),
        }
    }

    /// Everything received within `window`
    pub async fn drain(&mut self, window: Duration) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Some(message)) = tokio::time::timeout_at(deadline, self.outbound.recv()).await
        {
            messages.push(message);
        }
        messages
    }
}

/// PCM16 tone well above the VAD and barge-in thresholds
pub fn loud_audio(frames: usize) -> Bytes {
    let samples: Vec<f32> = (0..1600 * frames)
        .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16000.0).sin())
        .collect();
    Bytes::from(f32_to_pcm16(&samples))
}

pub async fn eventually<F: Fn() -> bool>(what: &str, condition: F) {
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {}", what);
}
