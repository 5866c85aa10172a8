//! Claude backend with native tool use
//!
//! Implements the Anthropic Messages API in streaming mode. Text deltas are
//! forwarded as they arrive; `tool_use` blocks are accumulated from their
//! partial JSON and returned with the outcome once the stream ends.
//!
//! Opening the stream is retried with exponential backoff on network and
//! 5xx failures. Once the first byte has been read no retry happens, since
//! deltas have already been handed downstream.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use voice_session_config::LlmVendorConfig;
use voice_session_core::{
    FinishReason, FunctionCallRequest, GenerateRequest, GenerationOutcome, LanguageModel, Message,
    Role, ToolDefinition,
};

use crate::LlmError;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Configuration for the Claude backend
#[derive(Debug, Clone)]
pub struct ClaudeConfig {
    pub api_key: String,
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
    /// Whole-request timeout
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// API base (for testing or a proxy)
    pub endpoint: String,
    /// Retries for transient failures while opening the stream
    pub max_retries: u32,
    /// Initial backoff, doubled per retry
    pub initial_backoff: Duration,
}

impl ClaudeConfig {
    pub fn from_vendor(config: &LlmVendorConfig, connect_timeout: Duration) -> Self {
        Self {
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature.clamp(0.0, 1.0),
            timeout: Duration::from_secs(config.timeout_secs),
            connect_timeout,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            max_retries: 2,
            initial_backoff: Duration::from_millis(100),
        }
    }
}

/// Streaming Claude backend
pub struct ClaudeBackend {
    config: ClaudeConfig,
    client: Client,
}

impl ClaudeBackend {
    pub fn new(config: ClaudeConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() {
            return Err(LlmError::Configuration(
                "ANTHROPIC_API_KEY not set. Set it via environment or config.".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| LlmError::Network(e.to_string()))?;

        Ok(Self { config, client })
    }

    fn build_request(&self, request: &GenerateRequest) -> ClaudeRequest {
        let system = request
            .messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.clone());
        let tools = convert_tools(&request.tools);

        ClaudeRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            messages: convert_messages(&request.messages),
            system,
            tools: if tools.is_empty() { None } else { Some(tools) },
            temperature: Some(self.config.temperature),
            stream: true,
        }
    }

    /// Open the event stream, retrying transient failures
    async fn open_stream(&self, body: &ClaudeRequest) -> Result<reqwest::Response, LlmError> {
        let mut last_error = None;
        let mut backoff = self.config.initial_backoff;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tracing::warn!(
                    "LLM request failed, retrying in {:?} (attempt {}/{})",
                    backoff,
                    attempt,
                    self.config.max_retries
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }

            match self.send(body).await {
                Ok(response) => return Ok(response),
                Err(e) if is_retryable(&e) => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| LlmError::Network("Max retries exceeded".to_string())))
    }

    async fn send(&self, body: &ClaudeRequest) -> Result<reqwest::Response, LlmError> {
        let response = self
            .client
            .post(format!("{}/v1/messages", self.config.endpoint))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error = response.text().await.unwrap_or_default();
            // 5xx errors are retryable, 4xx are not
            if status.is_server_error() {
                return Err(LlmError::Network(format!("Server error {}: {}", status, error)));
            }
            return Err(LlmError::Api(format!("HTTP {}: {}", status, error)));
        }
        Ok(response)
    }

    async fn stream_generation(
        &self,
        request: &GenerateRequest,
        tx: mpsc::Sender<String>,
    ) -> Result<GenerationOutcome, LlmError> {
        let body = self.build_request(request);
        let response = self.open_stream(&body).await?;

        let mut stream = response.bytes_stream();
        let mut lines = LineBuffer::default();
        let mut events = SseAccumulator::default();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| LlmError::Stream(e.to_string()))?;
            lines.push(&chunk);

            while let Some(line) = lines.next_line() {
                if let Some(text) = events.push_line(&line)? {
                    if tx.send(text).await.is_err() {
                        return Err(LlmError::Cancelled);
                    }
                }
            }
        }
        if let Some(line) = lines.finish() {
            if let Some(text) = events.push_line(&line)? {
                if tx.send(text).await.is_err() {
                    return Err(LlmError::Cancelled);
                }
            }
        }

        Ok(events.finish())
    }
}

#[async_trait]
impl LanguageModel for ClaudeBackend {
    async fn stream(
        &self,
        request: &GenerateRequest,
        tx: mpsc::Sender<String>,
    ) -> voice_session_core::Result<GenerationOutcome> {
        self.stream_generation(request, tx).await.map_err(Into::into)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

fn is_retryable(error: &LlmError) -> bool {
    matches!(error, LlmError::Network(_) | LlmError::Timeout)
}

/// Splits the response body into lines. Bytes are held until a line is
/// complete so a UTF-8 sequence split across network chunks decodes intact.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
    }

    fn next_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=end).collect();
        Some(String::from_utf8_lossy(&line).trim().to_string())
    }

    /// Trailing bytes of a body that did not end with a newline
    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).trim().to_string())
    }
}

/// Folds Messages API stream events into text deltas and an outcome
#[derive(Debug, Default)]
struct SseAccumulator {
    text: String,
    function_calls: Vec<FunctionCallRequest>,
    current_tool: Option<(String, String)>,
    current_tool_input: String,
    stop_reason: ClaudeStopReason,
}

impl SseAccumulator {
    /// Consume one SSE line; returns a text delta to forward, if any
    fn push_line(&mut self, line: &str) -> Result<Option<String>, LlmError> {
        let Some(json) = line.strip_prefix("data: ") else {
            return Ok(None);
        };
        if json == "[DONE]" {
            return Ok(None);
        }
        let Ok(event) = serde_json::from_str::<ClaudeStreamEvent>(json) else {
            tracing::trace!(line = json, "Skipping unrecognized stream event");
            return Ok(None);
        };

        match event {
            ClaudeStreamEvent::ContentBlockStart { content_block, .. } => {
                if let ClaudeContentBlock::ToolUse { id, name, .. } = content_block {
                    self.current_tool = Some((id, name));
                    self.current_tool_input.clear();
                }
            }
            ClaudeStreamEvent::ContentBlockDelta { delta, .. } => match delta {
                ClaudeDelta::TextDelta { text } => {
                    self.text.push_str(&text);
                    return Ok(Some(text));
                }
                ClaudeDelta::InputJsonDelta { partial_json } => {
                    self.current_tool_input.push_str(&partial_json);
                }
            },
            ClaudeStreamEvent::ContentBlockStop { .. } => {
                if let Some((id, name)) = self.current_tool.take() {
                    let arguments = if self.current_tool_input.trim().is_empty() {
                        Map::new()
                    } else {
                        serde_json::from_str::<Map<String, Value>>(&self.current_tool_input)
                            .map_err(|e| {
                                LlmError::InvalidResponse(format!("tool input for {}: {}", name, e))
                            })?
                    };
                    self.current_tool_input.clear();
                    self.function_calls.push(FunctionCallRequest {
                        id,
                        name,
                        arguments,
                    });
                }
            }
            ClaudeStreamEvent::MessageDelta { delta } => {
                if let Some(reason) = delta.stop_reason {
                    self.stop_reason = reason;
                }
            }
            ClaudeStreamEvent::Error { error } => {
                return Err(LlmError::Stream(error.message));
            }
            ClaudeStreamEvent::MessageStart
            | ClaudeStreamEvent::MessageStop
            | ClaudeStreamEvent::Ping => {}
        }
        Ok(None)
    }

    fn finish(self) -> GenerationOutcome {
        let finish_reason = match self.stop_reason {
            ClaudeStopReason::EndTurn | ClaudeStopReason::StopSequence => FinishReason::Stop,
            ClaudeStopReason::MaxTokens => FinishReason::Length,
            ClaudeStopReason::ToolUse => FinishReason::ToolCalls,
        };
        GenerationOutcome {
            text: self.text,
            function_calls: self.function_calls,
            finish_reason,
        }
    }
}

/// Convert history to Claude messages. Tool results become `tool_result`
/// blocks in a user turn; consecutive results share one turn.
fn convert_messages(messages: &[Message]) -> Vec<ClaudeMessage> {
    let mut converted: Vec<ClaudeMessage> = Vec::with_capacity(messages.len());

    for message in messages {
        match message.role {
            Role::System => {}
            Role::User => converted.push(ClaudeMessage {
                role: "user".to_string(),
                content: ClaudeContent::Text(message.content.clone()),
            }),
            Role::Assistant if message.tool_calls.is_empty() => converted.push(ClaudeMessage {
                role: "assistant".to_string(),
                content: ClaudeContent::Text(message.content.clone()),
            }),
            Role::Assistant => {
                let mut blocks = Vec::with_capacity(message.tool_calls.len() + 1);
                if !message.content.is_empty() {
                    blocks.push(ClaudeContentBlock::Text {
                        text: message.content.clone(),
                    });
                }
                for call in &message.tool_calls {
                    blocks.push(ClaudeContentBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input: Value::Object(call.arguments.clone()),
                    });
                }
                converted.push(ClaudeMessage {
                    role: "assistant".to_string(),
                    content: ClaudeContent::Blocks(blocks),
                });
            }
            Role::Tool => {
                let block = ClaudeContentBlock::ToolResult {
                    tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                    content: message.content.clone(),
                };
                let unmerged = match converted.last_mut() {
                    Some(ClaudeMessage {
                        role,
                        content: ClaudeContent::Blocks(blocks),
                    }) if *role == "user" => {
                        blocks.push(block);
                        None
                    }
                    _ => Some(block),
                };
                if let Some(block) = unmerged {
                    converted.push(ClaudeMessage {
                        role: "user".to_string(),
                        content: ClaudeContent::Blocks(vec![block]),
                    });
                }
            }
        }
    }
    converted
}

fn convert_tools(tools: &[ToolDefinition]) -> Vec<ClaudeTool> {
    tools
        .iter()
        .map(|t| ClaudeTool {
            name: t.name.clone(),
            description: t.description.clone(),
            input_schema: t.parameters.clone(),
        })
        .collect()
}

// =============================================================================
// Claude API Types
// =============================================================================

#[derive(Debug, Serialize)]
struct ClaudeRequest {
    model: String,
    max_tokens: usize,
    messages: Vec<ClaudeMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ClaudeTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ClaudeMessage {
    role: String,
    content: ClaudeContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ClaudeContent {
    Text(String),
    Blocks(Vec<ClaudeContentBlock>),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClaudeContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize)]
struct ClaudeTool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
enum ClaudeStopReason {
    #[default]
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClaudeStreamEvent {
    MessageStart,
    ContentBlockStart { content_block: ClaudeContentBlock },
    ContentBlockDelta { delta: ClaudeDelta },
    ContentBlockStop,
    MessageDelta { delta: ClaudeMessageDeltaBody },
    MessageStop,
    Ping,
    Error { error: ClaudeError },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClaudeDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
}

#[derive(Debug, Deserialize)]
struct ClaudeMessageDeltaBody {
    stop_reason: Option<ClaudeStopReason>,
}

#[derive(Debug, Deserialize)]
struct ClaudeError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> ClaudeConfig {
        let vendor = LlmVendorConfig {
            api_key: "test-key".to_string(),
            ..Default::default()
        };
        ClaudeConfig::from_vendor(&vendor, Duration::from_secs(10))
    }

    fn refill_call() -> FunctionCallRequest {
        let mut arguments = Map::new();
        arguments.insert("rx_number".into(), json!("RX-1001"));
        FunctionCallRequest {
            id: "toolu_1".into(),
            name: "request_refill".into(),
            arguments,
        }
    }

    #[test]
    fn test_requires_api_key() {
        let mut config = config();
        config.api_key.clear();
        assert!(matches!(ClaudeBackend::new(config), Err(LlmError::Configuration(_))));
    }

    #[test]
    fn test_request_serialization() {
        let backend = ClaudeBackend::new(config()).unwrap();
        let request = GenerateRequest {
            messages: vec![Message::system("You are helpful"), Message::user("Hello")],
            tools: vec![ToolDefinition {
                name: "request_refill".into(),
                description: "Request a prescription refill".into(),
                parameters: json!({"type": "object"}),
            }],
        };

        let json = serde_json::to_value(backend.build_request(&request)).unwrap();
        assert_eq!(json["system"], "You are helpful");
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"].as_array().unwrap().len(), 1);
        assert_eq!(json["messages"][0]["content"], "Hello");
        assert_eq!(json["tools"][0]["input_schema"]["type"], "object");
    }

    #[test]
    fn test_tool_turns_convert_to_blocks() {
        let messages = vec![
            Message::system("sys"),
            Message::user("Refill please"),
            Message::assistant_with_calls("Checking.", vec![refill_call()]),
            Message::tool("toolu_1", r#"{"status":"ready"}"#),
            Message::tool("toolu_2", r#"{"status":"late"}"#),
        ];

        let json = serde_json::to_value(convert_messages(&messages)).unwrap();
        let turns = json.as_array().unwrap();
        assert_eq!(turns.len(), 3);

        assert_eq!(turns[1]["role"], "assistant");
        assert_eq!(turns[1]["content"][1]["type"], "tool_use");
        assert_eq!(turns[1]["content"][1]["input"]["rx_number"], "RX-1001");

        assert_eq!(turns[2]["role"], "user");
        let results = turns[2]["content"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["type"], "tool_result");
        assert_eq!(results[0]["tool_use_id"], "toolu_1");
    }

    #[test]
    fn test_stream_text_deltas() {
        let mut acc = SseAccumulator::default();
        let lines = [
            "event: message_start",
            r#"data: {"type":"message_start","message":{"usage":{"input_tokens":5}}}"#,
            r#"data: {"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#,
            r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":" there."}}"#,
            r#"data: {"type":"content_block_stop","index":0}"#,
            r#"data: {"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":3}}"#,
            r#"data: {"type":"message_stop"}"#,
        ];

        let deltas: Vec<String> = lines
            .iter()
            .filter_map(|line| acc.push_line(line).unwrap())
            .collect();
        assert_eq!(deltas, vec!["Hello", " there."]);

        let outcome = acc.finish();
        assert_eq!(outcome.text, "Hello there.");
        assert_eq!(outcome.finish_reason, FinishReason::Stop);
        assert!(outcome.function_calls.is_empty());
    }

    #[test]
    fn test_stream_tool_use() {
        let mut acc = SseAccumulator::default();
        let lines = [
            r#"data: {"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"request_refill","input":{}}}"#,
            r#"data: {"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"rx_num"}}"#,
            r#"data: {"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"ber\": \"RX-1001\"}"}}"#,
            r#"data: {"type":"content_block_stop","index":1}"#,
            r#"data: {"type":"message_delta","delta":{"stop_reason":"tool_use"}}"#,
        ];
        for line in lines {
            assert_eq!(acc.push_line(line).unwrap(), None);
        }

        let outcome = acc.finish();
        assert_eq!(outcome.finish_reason, FinishReason::ToolCalls);
        assert_eq!(outcome.function_calls, vec![refill_call()]);
    }

    #[test]
    fn test_stream_error_event() {
        let mut acc = SseAccumulator::default();
        let err = acc
            .push_line(r#"data: {"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#)
            .unwrap_err();
        assert!(matches!(err, LlmError::Stream(ref m) if m == "Overloaded"));

        let core: voice_session_core::Error = err.into();
        assert_eq!(core.kind(), "stream");
    }

    #[test]
    fn test_multibyte_text_split_across_chunks() {
        let line = r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Café ok"}}"#;
        let body = format!("{}\n\n", line).into_bytes();
        // Split inside the two-byte encoding of 'é'
        let split = body.iter().position(|&b| b == 0xC3).unwrap() + 1;

        let mut lines = LineBuffer::default();
        let mut acc = SseAccumulator::default();
        let mut deltas = Vec::new();
        for chunk in [&body[..split], &body[split..]] {
            lines.push(chunk);
            while let Some(line) = lines.next_line() {
                deltas.extend(acc.push_line(&line).unwrap());
            }
        }

        assert_eq!(deltas, vec!["Café ok"]);
        assert_eq!(acc.finish().text, "Café ok");
        assert_eq!(lines.finish(), None);
    }

    #[test]
    fn test_line_buffer_keeps_unterminated_tail() {
        let mut lines = LineBuffer::default();
        lines.push(b"event: ping\ndata: {\"type\"");
        assert_eq!(lines.next_line().as_deref(), Some("event: ping"));
        assert_eq!(lines.next_line(), None);
        lines.push(b":\"ping\"}");
        assert_eq!(lines.finish().as_deref(), Some(r#"data: {"type":"ping"}"#));
    }

    #[test]
    fn test_retryable_errors() {
        assert!(is_retryable(&LlmError::Timeout));
        assert!(is_retryable(&LlmError::Network("reset".into())));
        assert!(!is_retryable(&LlmError::Api("401".into())));
    }
}
