//! Language model trait

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::llm_types::{GenerateRequest, GenerationOutcome};
use crate::Result;

/// Streaming language model with tool calling
///
/// Text deltas are sent to `tx` as they arrive. Tool calls requested by the
/// model are returned in the outcome once the stream ends.
#[async_trait]
pub trait LanguageModel: Send + Sync + 'static {
    async fn stream(
        &self,
        request: &GenerateRequest,
        tx: mpsc::Sender<String>,
    ) -> Result<GenerationOutcome>;

    /// Model name for logging
    fn model_name(&self) -> &str;
}
