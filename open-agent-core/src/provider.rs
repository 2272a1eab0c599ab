//! Normalized streaming interface to an LLM backend.
//!
//! Vendor adapters translate their wire formats into [`StreamChunk`]s; the
//! agent loop only ever sees this shape.

use crate::types::{Message, StopReason, ToolCall, ToolDefinition, Usage};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// One request to the provider.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Conversation history, replayable messages only.
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub system_instruction: Option<String>,
    /// Model override; `None` uses the provider's configured model.
    pub model: Option<String>,
    /// JSON schema the final answer must satisfy.
    pub output_schema: Option<Value>,
}

/// Items of a provider response stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    ContentDelta(String),
    ToolCall(ToolCall),
    Usage(Usage),
    StructuredOutput(Value),
    /// Provider-side failure. Followed by `Done`.
    Error(String),
    Done { stop_reason: Option<StopReason> },
}

pub type ChunkStream = BoxStream<'static, StreamChunk>;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider '{provider}' request failed: {message}")]
    Request { provider: String, message: String },
    #[error("provider request cancelled")]
    Cancelled,
}

impl ProviderError {
    pub fn request(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Request {
            provider: provider.into(),
            message: message.into(),
        }
    }
}

/// Trait for streaming model backends.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider identifier, e.g. `anthropic`.
    fn name(&self) -> &str;

    /// Model used when the request carries no override.
    fn model(&self) -> &str;

    /// Start a streaming chat completion.
    async fn chat(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, ProviderError>;
}
