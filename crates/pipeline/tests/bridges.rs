//! Bridge behavior against scripted vendors

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Map};
use tokio::sync::mpsc;

use voice_session_config::SentenceConfig;
use voice_session_core::{
    AudioFrame, Error, FinishReason, FunctionCallRequest, FunctionCallResult, GenerateRequest,
    GenerationOutcome, LanguageModel, Result, Role, SampleRate, SpeechToText, SttCommand,
    SttConnection, SttVendorEvent, TextToSpeech,
};
use voice_session_pipeline::{
    ResponseEvent, ResponseStreamBridge, SynthesisBridge, SynthesisEvent, SynthesisStart,
    TranscriptionBridge, TranscriptionConfig, TranscriptionEvent,
};

async fn recv<T>(rx: &mut mpsc::Receiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

// ---------------------------------------------------------------------------
// Synthesis
// ---------------------------------------------------------------------------

/// Sets its flag when dropped with the request future
struct ReleaseGuard(Arc<AtomicUsize>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Emits `chunks` chunks and then stalls until cancelled
struct StallingTts {
    chunks: usize,
    calls: Mutex<Vec<String>>,
    released: Arc<AtomicUsize>,
}

impl StallingTts {
    fn new(chunks: usize) -> Self {
        Self {
            chunks,
            calls: Mutex::new(Vec::new()),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl TextToSpeech for StallingTts {
    async fn stream(&self, text: &str, tx: mpsc::Sender<Bytes>) -> Result<()> {
        let _guard = ReleaseGuard(self.released.clone());
        self.calls.lock().push(text.to_string());
        for _ in 0..self.chunks {
            tx.send(Bytes::from_static(&[1, 0, 2, 0]))
                .await
                .map_err(|_| Error::Cancelled)?;
        }
        futures::future::pending::<()>().await;
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        24_000
    }

    fn name(&self) -> &str {
        "stalling"
    }
}

#[tokio::test]
async fn test_pause_then_resume_starts_exactly_one_new_stream() {
    let tts = Arc::new(StallingTts::new(2));
    let (tx, mut rx) = mpsc::channel::<SynthesisEvent>(64);
    let mut bridge = SynthesisBridge::new(tts.clone(), tx);

    let SynthesisStart::Started(first) = bridge.synthesize("The first sentence.") else {
        panic!("expected stream to start");
    };
    for _ in 0..2 {
        match recv(&mut rx).await {
            SynthesisEvent::Chunk { stream_id, .. } => assert_eq!(stream_id, first),
            other => panic!("unexpected event {:?}", other),
        }
    }

    bridge.pause();
    assert!(!bridge.is_current(first));
    assert_eq!(bridge.synthesize("The second sentence."), SynthesisStart::Queued);

    // Cancelling drops the vendor request
    tokio::time::timeout(Duration::from_secs(5), async {
        while tts.released.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("cancelled request was not released");

    let second = bridge.resume().expect("queued text should start");
    assert_ne!(second, first);
    for _ in 0..2 {
        match recv(&mut rx).await {
            SynthesisEvent::Chunk { stream_id, .. } => assert_eq!(stream_id, second),
            other => panic!("unexpected event {:?}", other),
        }
    }

    assert_eq!(
        *tts.calls.lock(),
        vec!["The first sentence.".to_string(), "The second sentence.".to_string()]
    );

    // Neither cancellation surfaces as an event
    bridge.stop();
    assert!(tokio::time::timeout(Duration::from_millis(50), rx.recv()).await.is_err());
}

/// Fails mid-stream after one chunk
struct FailingTts;

#[async_trait]
impl TextToSpeech for FailingTts {
    async fn stream(&self, _text: &str, tx: mpsc::Sender<Bytes>) -> Result<()> {
        let _ = tx.send(Bytes::from_static(&[0, 0])).await;
        Err(Error::Stream("connection reset".into()))
    }

    fn sample_rate(&self) -> u32 {
        16_000
    }

    fn name(&self) -> &str {
        "failing"
    }
}

#[tokio::test]
async fn test_vendor_fault_is_reported_as_error() {
    let (tx, mut rx) = mpsc::channel::<SynthesisEvent>(64);
    let mut bridge = SynthesisBridge::new(Arc::new(FailingTts), tx);
    let SynthesisStart::Started(id) = bridge.synthesize("Hello there.") else {
        panic!("expected stream to start");
    };

    assert!(matches!(recv(&mut rx).await, SynthesisEvent::Chunk { .. }));
    match recv(&mut rx).await {
        SynthesisEvent::Error { stream_id, error } => {
            assert_eq!(stream_id, id);
            assert_eq!(error.kind(), "stream");
        }
        other => panic!("unexpected event {:?}", other),
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

struct Script {
    deltas: Vec<&'static str>,
    calls: Vec<FunctionCallRequest>,
}

/// Replays one script per generation and records every request
struct ScriptedLlm {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedLlm {
    fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
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
        let script = self
            .scripts
            .lock()
            .pop_front()
            .ok_or_else(|| Error::Stream("no script left".into()))?;

        let mut text = String::new();
        for delta in script.deltas {
            text.push_str(delta);
            tx.send(delta.to_string()).await.map_err(|_| Error::Cancelled)?;
        }
        let finish_reason = if script.calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        };
        Ok(GenerationOutcome {
            text,
            function_calls: script.calls,
            finish_reason,
        })
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

fn refill_call() -> FunctionCallRequest {
    let mut arguments = Map::new();
    arguments.insert("rx_number".into(), json!("RX-1001"));
    FunctionCallRequest {
        id: "call_1".into(),
        name: "request_refill".into(),
        arguments,
    }
}

/// Collect chunks until the generation finishes
async fn collect_generation(
    rx: &mut mpsc::Receiver<ResponseEvent>,
) -> (Vec<voice_session_core::ResponseChunk>, u64, GenerationOutcome) {
    let mut chunks = Vec::new();
    loop {
        match recv(rx).await {
            ResponseEvent::Delta { .. } => {}
            ResponseEvent::Chunk { chunk, .. } => chunks.push(chunk),
            ResponseEvent::Finished {
                generation_id,
                outcome,
            } => return (chunks, generation_id, outcome),
            ResponseEvent::Error { error, .. } => panic!("generation failed: {}", error),
        }
    }
}

#[tokio::test]
async fn test_sentence_chunks_respect_abbreviations() {
    let llm = Arc::new(ScriptedLlm::new(vec![Script {
        deltas: vec!["Dr. Sm", "ith saw the patient. The vi", "sit was routine."],
        calls: Vec::new(),
    }]));
    let (tx, mut rx) = mpsc::channel(64);
    let mut bridge = ResponseStreamBridge::new(llm, SentenceConfig::default(), "", Vec::new(), tx);

    bridge.send_message("How did the visit go?").unwrap();
    let (chunks, _, _) = collect_generation(&mut rx).await;

    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].text, "Dr. Smith saw the patient.");
    assert!(chunks[0].is_sentence_complete);
    assert_eq!(chunks[1].text, "The visit was routine.");
    assert!(chunks[1].is_final);
    assert!(chunks.iter().all(|c| c.is_speakable()));
}

#[tokio::test]
async fn test_function_call_round_trip() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        Script {
            deltas: vec!["Let me check that ", "for you. "],
            calls: vec![refill_call()],
        },
        Script {
            deltas: vec!["Your refill is ready."],
            calls: Vec::new(),
        },
    ]));
    let (tx, mut rx) = mpsc::channel(64);
    let mut bridge =
        ResponseStreamBridge::new(llm.clone(), SentenceConfig::default(), "You are a pharmacy assistant.", Vec::new(), tx);
    bridge.start_conversation();

    let first = bridge.send_message("Refill my prescription").unwrap();
    let (chunks, generation_id, outcome) = collect_generation(&mut rx).await;
    assert_eq!(generation_id, first);
    assert_eq!(chunks[0].text, "Let me check that for you.");
    let call = chunks
        .iter()
        .find_map(|c| c.function_call.clone())
        .expect("function call chunk");
    assert_eq!(call.name, "request_refill");
    assert_eq!(call.arguments["rx_number"], "RX-1001");

    assert_eq!(bridge.on_generation_finished(generation_id, &outcome), 1);
    assert!(bridge.is_busy());
    assert!(bridge.send_message("hello?").is_err());

    let resumed = bridge
        .handle_function_result(FunctionCallResult {
            id: call.id.clone(),
            name: call.name.clone(),
            result: json!({"status": "ready"}),
        })
        .unwrap()
        .expect("generation resumes after last result");
    let (chunks, generation_id, outcome) = collect_generation(&mut rx).await;
    assert_eq!(generation_id, resumed);
    assert_eq!(chunks[0].text, "Your refill is ready.");
    assert_eq!(bridge.on_generation_finished(generation_id, &outcome), 0);
    assert!(!bridge.is_busy());

    let roles: Vec<Role> = bridge.history().iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant]
    );

    let requests = llm.requests.lock();
    let tool_message = &requests[1].messages[3];
    assert_eq!(tool_message.tool_call_id.as_deref(), Some("call_1"));
    assert_eq!(tool_message.content, r#"{"status":"ready"}"#);
}

#[tokio::test]
async fn test_start_conversation_resets_history() {
    let llm = Arc::new(ScriptedLlm::new(vec![Script {
        deltas: vec!["Hi there, how can I help?"],
        calls: Vec::new(),
    }]));
    let (tx, mut rx) = mpsc::channel(64);
    let mut bridge = ResponseStreamBridge::new(llm, SentenceConfig::default(), "System.", Vec::new(), tx);

    bridge.send_message("Hello").unwrap();
    let (_, id, outcome) = collect_generation(&mut rx).await;
    bridge.on_generation_finished(id, &outcome);
    assert_eq!(bridge.history().len(), 3);

    bridge.start_conversation();
    bridge.start_conversation();
    assert_eq!(bridge.history().len(), 1);
    assert_eq!(bridge.history()[0].role, Role::System);
}

#[tokio::test]
async fn test_unexpected_function_result_is_rejected() {
    let llm = Arc::new(ScriptedLlm::new(Vec::new()));
    let (tx, _rx) = mpsc::channel::<ResponseEvent>(8);
    let mut bridge = ResponseStreamBridge::new(llm, SentenceConfig::default(), "", Vec::new(), tx);
    let result = bridge.handle_function_result(FunctionCallResult {
        id: "call_9".into(),
        name: "lookup".into(),
        result: json!({}),
    });
    assert!(result.is_err());
}

// ---------------------------------------------------------------------------
// Transcription
// ---------------------------------------------------------------------------

/// Vendor side of one scripted connection
struct VendorEnd {
    commands: mpsc::Receiver<SttCommand>,
    events: mpsc::Sender<SttVendorEvent>,
}

/// Hands each successful connection's vendor end to the test. Connect
/// attempts fail once `remaining_successes` runs out.
struct ScriptedStt {
    remaining_successes: AtomicUsize,
    attempts: AtomicUsize,
    stall: AtomicBool,
    ends: mpsc::UnboundedSender<VendorEnd>,
}

impl ScriptedStt {
    fn new(successes: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<VendorEnd>) {
        let (ends, rx) = mpsc::unbounded_channel();
        let stt = Arc::new(Self {
            remaining_successes: AtomicUsize::new(successes),
            attempts: AtomicUsize::new(0),
            stall: AtomicBool::new(false),
            ends,
        });
        (stt, rx)
    }
}

#[async_trait]
impl SpeechToText for ScriptedStt {
    async fn connect(&self) -> Result<SttConnection> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.stall.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        let left = self.remaining_successes.load(Ordering::SeqCst);
        if left == 0 {
            return Err(Error::Connection("401 unauthorized".into()));
        }
        self.remaining_successes.store(left - 1, Ordering::SeqCst);

        let (command_tx, command_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = mpsc::channel(16);
        let _ = self.ends.send(VendorEnd {
            commands: command_rx,
            events: event_tx,
        });
        Ok(SttConnection {
            commands: command_tx,
            events: event_rx,
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn transcript(text: &str, is_final: bool) -> SttVendorEvent {
    SttVendorEvent::Transcript {
        text: text.into(),
        confidence: 0.9,
        is_final,
    }
}

fn abnormal_close() -> SttVendorEvent {
    SttVendorEvent::Closed {
        code: 1006,
        reason: "reset".into(),
    }
}

#[tokio::test]
async fn test_utterance_ids_advance_after_final() {
    let (stt, mut ends) = ScriptedStt::new(1);
    let (tx, mut rx) = mpsc::channel::<TranscriptionEvent>(16);
    let mut bridge = TranscriptionBridge::new(stt, TranscriptionConfig::default(), tx);
    bridge.connect().await.unwrap();
    let mut vendor = ends.recv().await.unwrap();

    for event in [
        transcript("refill", false),
        transcript("", false),
        transcript("refill my meds", true),
        transcript("thanks", false),
    ] {
        vendor.events.send(event).await.unwrap();
    }

    let mut received = Vec::new();
    for _ in 0..3 {
        match recv(&mut rx).await {
            TranscriptionEvent::Transcript(t) => received.push((t.utterance_id, t.text, t.is_final)),
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert_eq!(
        received,
        vec![
            (0, "refill".to_string(), false),
            (0, "refill my meds".to_string(), true),
            (1, "thanks".to_string(), false),
        ]
    );

    let frame = AudioFrame::from_f32(&[0.1; 160], SampleRate::Hz16000, 0);
    bridge.send_audio(&frame);
    assert!(matches!(vendor.commands.recv().await, Some(SttCommand::Audio(_))));
    bridge.finalize().await.unwrap();
    assert_eq!(vendor.commands.recv().await, Some(SttCommand::Finalize));

    bridge.disconnect();
    bridge.disconnect();
    assert!(!bridge.is_connected());
    assert_eq!(vendor.commands.recv().await, Some(SttCommand::Close));
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_after_abnormal_close() {
    let (stt, mut ends) = ScriptedStt::new(2);
    let (tx, mut rx) = mpsc::channel::<TranscriptionEvent>(16);
    let mut bridge = TranscriptionBridge::new(stt.clone(), TranscriptionConfig::default(), tx);
    bridge.connect().await.unwrap();

    let first = ends.recv().await.unwrap();
    first.events.send(abnormal_close()).await.unwrap();

    assert_eq!(recv(&mut rx).await, TranscriptionEvent::Reconnected { attempt: 1 });
    assert!(bridge.is_connected());
    assert_eq!(stt.attempts.load(Ordering::SeqCst), 2);

    let second = ends.recv().await.unwrap();
    second.events.send(transcript("hello", true)).await.unwrap();
    assert!(matches!(recv(&mut rx).await, TranscriptionEvent::Transcript(t) if t.text == "hello"));
}

#[tokio::test(start_paused = true)]
async fn test_fatal_after_reconnects_exhausted() {
    let (stt, mut ends) = ScriptedStt::new(1);
    let (tx, mut rx) = mpsc::channel::<TranscriptionEvent>(16);
    let config = TranscriptionConfig::default();
    let max_attempts = config.max_reconnect_attempts as usize;
    let mut bridge = TranscriptionBridge::new(stt.clone(), config, tx);
    bridge.connect().await.unwrap();

    let vendor = ends.recv().await.unwrap();
    vendor.events.send(abnormal_close()).await.unwrap();

    match recv(&mut rx).await {
        TranscriptionEvent::Fatal(error) => assert_eq!(error.kind(), "connection"),
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(stt.attempts.load(Ordering::SeqCst), 1 + max_attempts);
    assert!(!bridge.is_connected());

    // Audio while disconnected is dropped silently
    let frame = AudioFrame::from_f32(&[0.1; 160], SampleRate::Hz16000, 0);
    bridge.send_audio(&frame);
    assert!(bridge.finalize().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_connect_times_out() {
    let (stt, _ends) = ScriptedStt::new(1);
    stt.stall.store(true, Ordering::SeqCst);
    let (tx, _rx) = mpsc::channel::<TranscriptionEvent>(16);
    let mut bridge = TranscriptionBridge::new(stt, TranscriptionConfig::default(), tx);

    let err = bridge.connect().await.unwrap_err();
    assert!(matches!(err, voice_session_pipeline::PipelineError::Connection(_)));
    assert!(!bridge.is_connected());
}

#[tokio::test]
async fn test_normal_close_does_not_reconnect() {
    let (stt, mut ends) = ScriptedStt::new(2);
    let (tx, mut rx) = mpsc::channel::<TranscriptionEvent>(16);
    let mut bridge = TranscriptionBridge::new(stt.clone(), TranscriptionConfig::default(), tx);
    bridge.connect().await.unwrap();

    let vendor = ends.recv().await.unwrap();
    vendor
        .events
        .send(SttVendorEvent::Closed {
            code: 1000,
            reason: String::new(),
        })
        .await
        .unwrap();

    assert!(tokio::time::timeout(Duration::from_millis(100), rx.recv()).await.is_err());
    assert_eq!(stt.attempts.load(Ordering::SeqCst), 1);
    assert!(!bridge.is_connected());
}

#[tokio::test]
async fn test_background_connect_reports_connected() {
    let (stt, mut ends) = ScriptedStt::new(1);
    let (tx, mut rx) = mpsc::channel::<TranscriptionEvent>(16);
    let mut bridge = TranscriptionBridge::new(stt.clone(), TranscriptionConfig::default(), tx);

    bridge.connect_in_background();
    bridge.connect_in_background();
    assert_eq!(recv(&mut rx).await, TranscriptionEvent::Connected);
    assert!(bridge.is_connected());
    assert!(!bridge.is_connecting());
    assert_eq!(stt.attempts.load(Ordering::SeqCst), 1);

    let vendor = ends.recv().await.unwrap();
    vendor.events.send(transcript("hello", true)).await.unwrap();
    assert!(matches!(recv(&mut rx).await, TranscriptionEvent::Transcript(t) if t.text == "hello"));
}

#[tokio::test(start_paused = true)]
async fn test_background_connect_reports_timeout() {
    let (stt, _ends) = ScriptedStt::new(1);
    stt.stall.store(true, Ordering::SeqCst);
    let (tx, mut rx) = mpsc::channel::<TranscriptionEvent>(16);
    let config = TranscriptionConfig {
        connect_timeout: Duration::from_secs(1),
        ..TranscriptionConfig::default()
    };
    let mut bridge = TranscriptionBridge::new(stt, config, tx);

    bridge.connect_in_background();
    assert!(bridge.is_connecting());
    assert!(!bridge.is_connected());

    match recv(&mut rx).await {
        TranscriptionEvent::ConnectFailed(error) => assert_eq!(error.kind(), "connection"),
        other => panic!("unexpected event {:?}", other),
    }
    assert!(!bridge.is_connected());
}

#[tokio::test]
async fn test_disconnect_cancels_pending_connect() {
    let (stt, _ends) = ScriptedStt::new(1);
    stt.stall.store(true, Ordering::SeqCst);
    let (tx, mut rx) = mpsc::channel::<TranscriptionEvent>(16);
    let mut bridge = TranscriptionBridge::new(stt, TranscriptionConfig::default(), tx);

    bridge.connect_in_background();
    bridge.disconnect();
    assert!(!bridge.is_connecting());
    assert!(tokio::time::timeout(Duration::from_millis(100), rx.recv()).await.is_err());
}
