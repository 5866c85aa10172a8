//! Audit sink writing lifecycle events to `tracing`
//!
//! Events are emitted under target `audit` so they can be routed to a
//! separate log stream with an `EnvFilter` directive such as `audit=info`.

use async_trait::async_trait;

use voice_session_core::{AuditEvent, AuditSink, Result};

#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        let payload = serde_json::to_string(&event)?;
        match &event {
            AuditEvent::SessionStarted { session_id }
            | AuditEvent::FunctionInvoked { session_id, .. }
            | AuditEvent::InteractionChecked { session_id, .. }
            | AuditEvent::SessionClosed { session_id, .. } => {
                tracing::info!(target: "audit", session_id = %session_id, event = %payload, "audit");
            }
        }
        Ok(())
    }
}
