// Shared fixtures for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use open_agent_core::testing::ScriptedProvider;
use open_agent_core::{
    ChatRequest, ChunkStream, Message, Provider, ProviderError, Tool, ToolCall, ToolContext,
    ToolError,
};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const READ_PROMPT: &str = "read file X then report its line count";

/// Provider scripted for the read-then-count scenario.
pub fn read_scenario_provider() -> Arc<ScriptedProvider> {
    Arc::new(
        ScriptedProvider::new()
            .tool_turn(vec![ToolCall::new(
                "call-read",
                "Read",
                r#"{"file_path":"X"}"#,
            )])
            .text_turn("X has 3 lines."),
    )
}

/// Short labels for message kinds, e.g. `assistant+tools`.
pub fn kinds(messages: &[Message]) -> Vec<&'static str> {
    messages
        .iter()
        .map(|message| match message {
            Message::User(_) => "user",
            Message::Assistant(m) if m.has_tool_calls() => "assistant+tools",
            Message::Assistant(_) => "assistant",
            Message::ToolResult(_) => "tool_result",
            Message::System(_) => "system",
            Message::Result(_) => "result",
            Message::StreamEvent(_) => "stream_event",
        })
        .collect()
}

/// Provider whose every request panics.
pub struct PanickingProvider;

#[async_trait]
impl Provider for PanickingProvider {
    fn name(&self) -> &str {
        "panicking"
    }

    fn model(&self) -> &str {
        "panicking-model"
    }

    async fn chat(
        &self,
        _request: ChatRequest,
        _cancel: CancellationToken,
    ) -> Result<ChunkStream, ProviderError> {
        panic!("provider exploded")
    }
}

/// Tool whose every call panics.
pub struct PanickingTool(pub &'static str);

#[async_trait]
impl Tool for PanickingTool {
    fn name(&self) -> &str {
        self.0
    }

    fn description(&self) -> &str {
        "Panics on every call"
    }

    async fn execute(&self, _input: Value, _context: ToolContext) -> Result<Value, ToolError> {
        panic!("disk on fire")
    }
}
