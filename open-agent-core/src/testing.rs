//! Scripted collaborators for exercising the agent loop without a network.

use crate::provider::{ChatRequest, ChunkStream, Provider, ProviderError, StreamChunk};
use crate::tooling::{Tool, ToolContext, ToolError};
use crate::types::{StopReason, ToolCall, Usage};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Replays one pre-recorded chunk list per `chat` call and records requests.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    name: String,
    model: String,
    turns: Mutex<VecDeque<Vec<StreamChunk>>>,
    requests: Mutex<Vec<ChatRequest>>,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            name: "scripted".into(),
            model: "scripted-model".into(),
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Wait this long before answering each request. Honours cancellation.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn turn(self, chunks: Vec<StreamChunk>) -> Self {
        lock(&self.turns).push_back(chunks);
        self
    }

    /// A final answer with no tool calls.
    pub fn text_turn(self, text: impl Into<String>) -> Self {
        self.turn(vec![
            StreamChunk::ContentDelta(text.into()),
            StreamChunk::Usage(Usage::new(10, 5)),
            StreamChunk::Done {
                stop_reason: Some(StopReason::EndTurn),
            },
        ])
    }

    /// A turn requesting the given tool calls.
    pub fn tool_turn(self, calls: Vec<ToolCall>) -> Self {
        let mut chunks: Vec<StreamChunk> = calls.into_iter().map(StreamChunk::ToolCall).collect();
        chunks.push(StreamChunk::Usage(Usage::new(10, 5)));
        chunks.push(StreamChunk::Done {
            stop_reason: Some(StopReason::ToolUse),
        });
        self.turn(chunks)
    }

    /// Queue another turn on a provider that is already shared.
    pub fn push_turn(&self, chunks: Vec<StreamChunk>) {
        lock(&self.turns).push_back(chunks);
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        lock(&self.requests).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn remaining_turns(&self) -> usize {
        lock(&self.turns).len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, ProviderError> {
        lock(&self.requests).push(request);
        if let Some(delay) = self.delay {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        let chunks = lock(&self.turns)
            .pop_front()
            .ok_or_else(|| ProviderError::request(&self.name, "script exhausted"))?;
        Ok(futures::stream::iter(chunks).boxed())
    }
}

/// Returns a fixed output and records every input it receives.
#[derive(Debug, Clone)]
pub struct StaticTool {
    name: String,
    output: Value,
    delay: Option<Duration>,
    inputs: Arc<Mutex<Vec<Value>>>,
}

impl StaticTool {
    pub fn new(name: impl Into<String>, output: Value) -> Self {
        Self {
            name: name.into(),
            output,
            delay: None,
            inputs: Arc::default(),
        }
    }

    /// Sleep before returning, ignoring cancellation like a long shell command.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn inputs(&self) -> Vec<Value> {
        lock(&self.inputs).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.inputs).len()
    }
}

#[async_trait]
impl Tool for StaticTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Returns a canned response"
    }

    async fn execute(&self, input: Value, _context: ToolContext) -> Result<Value, ToolError> {
        lock(&self.inputs).push(input);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.output.clone())
    }
}

/// Always fails with the configured message.
#[derive(Debug, Clone)]
pub struct FailingTool {
    name: String,
    message: String,
}

impl FailingTool {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Fails on every call"
    }

    async fn execute(&self, _input: Value, _context: ToolContext) -> Result<Value, ToolError> {
        Err(ToolError::execution(self.message.clone()))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}
