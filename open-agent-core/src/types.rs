//! Message model shared by the agent loop, sessions and the session log.

use chrono::{DateTime, Utc};
use open_agent_session::LogEntry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ops::AddAssign;
use uuid::Uuid;

pub fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON arguments as streamed by the provider.
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Parse the arguments. Empty arguments are treated as an empty object.
    pub fn input(&self) -> Result<Value, serde_json::Error> {
        if self.arguments.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_str(&self.arguments)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMessage {
    pub id: String,
    pub session_id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantMessage {
    pub id: String,
    pub session_id: String,
    #[serde(default)]
    pub text_parts: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    pub timestamp: DateTime<Utc>,
}

impl AssistantMessage {
    pub fn text(&self) -> String {
        self.text_parts.concat()
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultMessage {
    pub id: String,
    pub session_id: String,
    pub tool_call_id: String,
    pub tool_name: String,
    pub result: Value,
    pub is_error: bool,
}

/// Session metadata announced before the first turn. Never replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMessage {
    pub id: String,
    pub session_id: String,
    pub subtype: String,
    pub model: String,
    pub provider: String,
    pub tools: Vec<String>,
    pub cwd: String,
    pub permission_mode: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mcp_servers: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultOutcome {
    Success,
    ErrorMaxTurns,
    ErrorDuringExecution,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMessage {
    pub id: String,
    pub session_id: String,
    pub outcome: ResultOutcome,
    pub duration_ms: u64,
    pub turns: u32,
    pub usage: Usage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_output: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl ResultMessage {
    pub fn is_success(&self) -> bool {
        self.outcome == ResultOutcome::Success
    }
}

/// Incremental assistant text, only produced when partial messages are enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    pub session_id: String,
    pub delta: String,
}

/// Every item a session produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    User(UserMessage),
    Assistant(AssistantMessage),
    ToolResult(ToolResultMessage),
    System(SystemMessage),
    Result(ResultMessage),
    StreamEvent(StreamEvent),
}

impl Message {
    pub fn user(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        Message::User(UserMessage {
            id: new_message_id(),
            session_id: session_id.into(),
            text: text.into(),
        })
    }

    pub fn session_id(&self) -> &str {
        match self {
            Message::User(m) => &m.session_id,
            Message::Assistant(m) => &m.session_id,
            Message::ToolResult(m) => &m.session_id,
            Message::System(m) => &m.session_id,
            Message::Result(m) => &m.session_id,
            Message::StreamEvent(m) => &m.session_id,
        }
    }

    /// Rewrite the owning session, used when a history is forked.
    pub fn set_session_id(&mut self, session_id: &str) {
        let slot = match self {
            Message::User(m) => &mut m.session_id,
            Message::Assistant(m) => &mut m.session_id,
            Message::ToolResult(m) => &mut m.session_id,
            Message::System(m) => &mut m.session_id,
            Message::Result(m) => &mut m.session_id,
            Message::StreamEvent(m) => &mut m.session_id,
        };
        *slot = session_id.to_string();
    }

    /// Whether the message is part of the conversation sent back to the provider.
    pub fn is_replayable(&self) -> bool {
        matches!(
            self,
            Message::User(_) | Message::Assistant(_) | Message::ToolResult(_)
        )
    }

    /// Transient messages are yielded to callers but never stored.
    pub fn is_transient(&self) -> bool {
        matches!(self, Message::StreamEvent(_))
    }

    pub fn as_assistant(&self) -> Option<&AssistantMessage> {
        match self {
            Message::Assistant(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_tool_result(&self) -> Option<&ToolResultMessage> {
        match self {
            Message::ToolResult(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_result(&self) -> Option<&ResultMessage> {
        match self {
            Message::Result(m) => Some(m),
            _ => None,
        }
    }
}

impl LogEntry for Message {
    fn prompt_text(&self) -> Option<&str> {
        match self {
            Message::User(m) => Some(&m.text),
            _ => None,
        }
    }
}

/// Definition of a tool as advertised to the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}
