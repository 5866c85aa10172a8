//! Function registry
//!
//! Default [`FunctionExecutor`] backing model tool calls. Deployments with
//! real domain services register their own executor; the registry here
//! answers unknown functions with an `{"error": ...}` object so the model
//! can recover in-conversation.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use voice_session_core::{FunctionCallRequest, FunctionExecutor, Result, ToolDefinition};

type Handler = Arc<dyn Fn(&Map<String, Value>) -> Value + Send + Sync>;

struct Registered {
    definition: ToolDefinition,
    handler: Handler,
}

/// Named synchronous functions with a per-call timeout
pub struct BuiltinFunctions {
    functions: HashMap<String, Registered>,
    timeout: Duration,
}

impl BuiltinFunctions {
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
            timeout: Duration::from_secs(5),
        }
    }

    /// Registry with the functions every deployment ships
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            ToolDefinition {
                name: "current_time".to_string(),
                description: "Current date and time in UTC".to_string(),
                parameters: json!({ "type": "object", "properties": {} }),
            },
            |_| json!({ "utc": chrono::Utc::now().to_rfc3339() }),
        );
        registry
    }

    pub fn register<F>(&mut self, definition: ToolDefinition, handler: F)
    where
        F: Fn(&Map<String, Value>) -> Value + Send + Sync + 'static,
    {
        self.functions.insert(
            definition.name.clone(),
            Registered {
                definition,
                handler: Arc::new(handler),
            },
        );
    }

    /// Tool definitions offered to the model
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<_> = self.functions.values().map(|f| f.definition.clone()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl Default for BuiltinFunctions {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[async_trait]
impl FunctionExecutor for BuiltinFunctions {
    async fn execute(&self, request: &FunctionCallRequest) -> Result<Value> {
        let Some(function) = self.functions.get(&request.name) else {
            tracing::warn!(function = %request.name, "Unknown function requested");
            return Ok(json!({ "error": format!("unknown function: {}", request.name) }));
        };

        let handler = function.handler.clone();
        let arguments = request.arguments.clone();
        let call = tokio::task::spawn_blocking(move || handler(&arguments));

        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Ok(json!({ "error": format!("function failed: {}", e) })),
            Err(_) => {
                tracing::warn!(function = %request.name, "Function timed out");
                Ok(json!({ "error": format!("{} timed out", request.name) }))
            }
        }
    }
}
