//! External collaborator traits

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::transcript::FunctionCallRequest;
use crate::Result;

/// Executes model-requested functions against domain services.
///
/// The result is an opaque JSON object that is fed back to the model
/// without interpretation.
#[async_trait]
pub trait FunctionExecutor: Send + Sync + 'static {
    async fn execute(&self, request: &FunctionCallRequest) -> Result<Value>;
}

/// Lifecycle notification for audit logging
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    SessionStarted { session_id: String },
    FunctionInvoked { session_id: String, name: String },
    InteractionChecked { session_id: String, utterance_id: u64 },
    SessionClosed { session_id: String, reason: String },
}

/// Audit sink. Failures are logged by the caller and never affect the session.
#[async_trait]
pub trait AuditSink: Send + Sync + 'static {
    async fn record(&self, event: AuditEvent) -> Result<()>;
}
