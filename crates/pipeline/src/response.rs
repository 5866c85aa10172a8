//! Response stream bridge
//!
//! Drives one streaming generation at a time against the language model,
//! splitting the text deltas into sentence-complete [`ResponseChunk`]s as
//! they arrive. Tool calls requested by the model are surfaced as chunks
//! carrying a [`FunctionCallRequest`]; the caller executes them and feeds
//! each result back through [`ResponseStreamBridge::handle_function_result`],
//! which resumes generation once every pending call has been answered.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use voice_session_config::SentenceConfig;
use voice_session_core::{
    Error, FunctionCallResult, GenerateRequest, GenerationOutcome, LanguageModel, Message,
    ResponseChunk, ToolDefinition,
};

use crate::processors::SentenceBoundaryDetector;
use crate::PipelineError;

/// Events raised by a generation, tagged with its id
#[derive(Debug, Clone)]
pub enum ResponseEvent {
    /// Raw text delta, for live captions
    Delta { generation_id: u64, text: String },
    Chunk { generation_id: u64, chunk: ResponseChunk },
    Finished { generation_id: u64, outcome: GenerationOutcome },
    Error { generation_id: u64, error: Error },
}

impl ResponseEvent {
    pub fn generation_id(&self) -> u64 {
        match self {
            ResponseEvent::Delta { generation_id, .. }
            | ResponseEvent::Chunk { generation_id, .. }
            | ResponseEvent::Finished { generation_id, .. }
            | ResponseEvent::Error { generation_id, .. } => *generation_id,
        }
    }
}

struct ActiveGeneration {
    id: u64,
    handle: JoinHandle<()>,
}

/// Per-session response bridge
pub struct ResponseStreamBridge<E> {
    llm: Arc<dyn LanguageModel>,
    events: mpsc::Sender<E>,
    sentence_config: SentenceConfig,
    system_prompt: String,
    tools: Vec<ToolDefinition>,
    history: Vec<Message>,
    started: bool,
    active: Option<ActiveGeneration>,
    pending_calls: usize,
    next_generation_id: u64,
}

impl<E> ResponseStreamBridge<E>
where
    E: From<ResponseEvent> + Send + 'static,
{
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        sentence_config: SentenceConfig,
        system_prompt: impl Into<String>,
        tools: Vec<ToolDefinition>,
        events: mpsc::Sender<E>,
    ) -> Self {
        Self {
            llm,
            events,
            sentence_config,
            system_prompt: system_prompt.into(),
            tools,
            history: Vec::new(),
            started: false,
            active: None,
            pending_calls: 0,
            next_generation_id: 1,
        }
    }

    /// Reset the conversation to just the system prompt
    pub fn start_conversation(&mut self) {
        self.cancel();
        self.history.clear();
        if !self.system_prompt.is_empty() {
            self.history.push(Message::system(self.system_prompt.clone()));
        }
        self.pending_calls = 0;
        self.started = true;
        tracing::debug!(model = self.llm.model_name(), "Conversation started");
    }

    /// Append a user turn and start generating. Fails while a generation
    /// or its tool calls are still outstanding.
    pub fn send_message(&mut self, text: impl Into<String>) -> Result<u64, PipelineError> {
        if self.active.is_some() || self.pending_calls > 0 {
            return Err(PipelineError::Stream("a generation is already in flight".to_string()));
        }
        if !self.started {
            self.start_conversation();
        }
        self.history.push(Message::user(text));
        Ok(self.spawn_generation())
    }

    /// Record a finished generation in the history. Returns the number of
    /// tool calls awaiting results.
    pub fn on_generation_finished(&mut self, generation_id: u64, outcome: &GenerationOutcome) -> usize {
        if !self.is_current(generation_id) {
            return 0;
        }
        self.active = None;
        self.history.push(Message::assistant_with_calls(
            outcome.text.clone(),
            outcome.function_calls.clone(),
        ));
        self.pending_calls = outcome.function_calls.len();
        self.pending_calls
    }

    /// Drop a failed generation. The user turn stays in the history.
    pub fn on_generation_failed(&mut self, generation_id: u64) {
        if self.is_current(generation_id) {
            self.active = None;
            self.pending_calls = 0;
        }
    }

    /// Feed a tool result back. Generation resumes once every call of the
    /// previous turn has been answered; the new generation id is returned.
    pub fn handle_function_result(
        &mut self,
        result: FunctionCallResult,
    ) -> Result<Option<u64>, PipelineError> {
        if self.pending_calls == 0 {
            return Err(PipelineError::Stream(format!(
                "unexpected result for function {}",
                result.name
            )));
        }

        tracing::debug!(function = %result.name, call_id = %result.id, "Function result received");
        self.history.push(Message::tool(result.id, result.result.to_string()));
        self.pending_calls -= 1;

        if self.pending_calls > 0 {
            return Ok(None);
        }
        Ok(Some(self.spawn_generation()))
    }

    /// Abort the in-flight generation without touching the history
    pub fn cancel(&mut self) {
        if let Some(active) = self.active.take() {
            tracing::debug!(generation_id = active.id, "Cancelling generation");
            active.handle.abort();
        }
    }

    pub fn is_current(&self, generation_id: u64) -> bool {
        self.active.as_ref().map(|g| g.id) == Some(generation_id)
    }

    /// Whether a generation or its tool calls are outstanding
    pub fn is_busy(&self) -> bool {
        self.active.is_some() || self.pending_calls > 0
    }

    pub fn pending_calls(&self) -> usize {
        self.pending_calls
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    fn spawn_generation(&mut self) -> u64 {
        let id = self.next_generation_id;
        self.next_generation_id += 1;

        let request = GenerateRequest {
            messages: self.history.clone(),
            tools: self.tools.clone(),
        };
        let handle = tokio::spawn(run_generation(
            id,
            self.llm.clone(),
            request,
            SentenceBoundaryDetector::new(self.sentence_config.clone()),
            self.events.clone(),
        ));
        tracing::debug!(generation_id = id, turns = self.history.len(), "Generation started");

        self.active = Some(ActiveGeneration { id, handle });
        id
    }
}

impl<E> Drop for ResponseStreamBridge<E> {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.handle.abort();
        }
    }
}

async fn run_generation<E>(
    generation_id: u64,
    llm: Arc<dyn LanguageModel>,
    request: GenerateRequest,
    mut detector: SentenceBoundaryDetector,
    events: mpsc::Sender<E>,
) where
    E: From<ResponseEvent> + Send + 'static,
{
    let (delta_tx, delta_rx) = mpsc::channel::<String>(64);

    let produce = llm.stream(&request, delta_tx);
    let forward = async {
        let mut delta_rx = delta_rx;
        while let Some(delta) = delta_rx.recv().await {
            let units = detector.add_text(&delta);
            let delta_event = ResponseEvent::Delta {
                generation_id,
                text: delta,
            };
            if events.send(delta_event.into()).await.is_err() {
                return;
            }
            for unit in units {
                let chunk = ResponseChunk::sentence(unit.text);
                if events
                    .send(ResponseEvent::Chunk { generation_id, chunk }.into())
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }
    };

    let (result, ()) = futures::future::join(produce, forward).await;

    let mut tail = Vec::new();
    match result {
        Ok(outcome) => {
            if let Some(unit) = detector.flush() {
                tail.push(ResponseEvent::Chunk {
                    generation_id,
                    chunk: ResponseChunk::flushed(unit.text),
                });
            }
            for call in &outcome.function_calls {
                tracing::info!(function = %call.name, call_id = %call.id, "Model requested function call");
                tail.push(ResponseEvent::Chunk {
                    generation_id,
                    chunk: ResponseChunk::call(call.clone()),
                });
            }
            tail.push(ResponseEvent::Finished {
                generation_id,
                outcome,
            });
        }
        Err(error) => {
            tracing::warn!(generation_id, error = %error, "Generation failed");
            tail.push(ResponseEvent::Error {
                generation_id,
                error,
            });
        }
    }

    for event in tail {
        if events.send(event.into()).await.is_err() {
            return;
        }
    }
}
