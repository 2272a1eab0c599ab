//! # Hooks
//!
//! Externally registered callbacks invoked at named lifecycle points.
//!
//! Callbacks for one event run one after another in registration order. A
//! failing or timed-out callback never aborts the pipeline: its result is
//! replaced by `{continue: false, reason}` and the next callback runs.

mod manager;
mod matcher;

pub use manager::HookManager;
pub use matcher::HookMatcher;

use crate::permissions::PermissionMode;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookEvent {
    PreToolUse,
    PostToolUse,
    PostToolUseFailure,
    UserPromptSubmit,
    SessionStart,
    SessionEnd,
    Stop,
    SubagentStart,
    SubagentStop,
    PermissionRequest,
    Notification,
    PreCompact,
}

impl HookEvent {
    pub const ALL: [HookEvent; 12] = [
        HookEvent::PreToolUse,
        HookEvent::PostToolUse,
        HookEvent::PostToolUseFailure,
        HookEvent::UserPromptSubmit,
        HookEvent::SessionStart,
        HookEvent::SessionEnd,
        HookEvent::Stop,
        HookEvent::SubagentStart,
        HookEvent::SubagentStop,
        HookEvent::PermissionRequest,
        HookEvent::Notification,
        HookEvent::PreCompact,
    ];
}

/// Event-specific part of a hook input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "hookEventName", rename_all_fields = "camelCase")]
pub enum HookPayload {
    PreToolUse {
        tool_name: String,
        tool_input: Value,
    },
    PostToolUse {
        tool_name: String,
        tool_input: Value,
        tool_response: Value,
    },
    PostToolUseFailure {
        tool_name: String,
        tool_input: Value,
        error: String,
    },
    UserPromptSubmit {
        prompt: String,
    },
    SessionStart {
        source: String,
    },
    SessionEnd {
        reason: String,
    },
    Stop {
        result: String,
    },
    SubagentStart {
        agent_type: String,
        prompt: String,
    },
    SubagentStop {
        agent_type: String,
        result: Option<String>,
    },
    PermissionRequest {
        tool_name: String,
        tool_input: Value,
        reason: Option<String>,
    },
    Notification {
        message: String,
        title: Option<String>,
    },
    PreCompact {
        trigger: String,
        custom_instructions: Option<String>,
    },
}

impl HookPayload {
    pub fn event(&self) -> HookEvent {
        match self {
            HookPayload::PreToolUse { .. } => HookEvent::PreToolUse,
            HookPayload::PostToolUse { .. } => HookEvent::PostToolUse,
            HookPayload::PostToolUseFailure { .. } => HookEvent::PostToolUseFailure,
            HookPayload::UserPromptSubmit { .. } => HookEvent::UserPromptSubmit,
            HookPayload::SessionStart { .. } => HookEvent::SessionStart,
            HookPayload::SessionEnd { .. } => HookEvent::SessionEnd,
            HookPayload::Stop { .. } => HookEvent::Stop,
            HookPayload::SubagentStart { .. } => HookEvent::SubagentStart,
            HookPayload::SubagentStop { .. } => HookEvent::SubagentStop,
            HookPayload::PermissionRequest { .. } => HookEvent::PermissionRequest,
            HookPayload::Notification { .. } => HookEvent::Notification,
            HookPayload::PreCompact { .. } => HookEvent::PreCompact,
        }
    }
}

/// Full input handed to a hook callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookInput {
    pub session_id: String,
    pub cwd: String,
    pub permission_mode: PermissionMode,
    #[serde(flatten)]
    pub payload: HookPayload,
}

impl HookInput {
    pub fn event(&self) -> HookEvent {
        self.payload.event()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookDecision {
    Approve,
    Block,
}

/// What a callback reports back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookOutput {
    #[serde(rename = "continue", default = "default_continue")]
    pub continue_: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<HookDecision>,
    /// Replacement tool input, honoured for `PreToolUse`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,
}

fn default_continue() -> bool {
    true
}

impl Default for HookOutput {
    fn default() -> Self {
        Self {
            continue_: true,
            reason: None,
            decision: None,
            updated_input: None,
            system_message: None,
        }
    }
}

impl HookOutput {
    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            decision: Some(HookDecision::Block),
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn with_updated_input(input: Value) -> Self {
        Self {
            updated_input: Some(input),
            ..Self::default()
        }
    }

    /// Result synthesized for a callback that failed.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            continue_: false,
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn is_block(&self) -> bool {
        self.decision == Some(HookDecision::Block)
    }
}

#[derive(Debug, Error)]
pub enum HookError {
    #[error("{0}")]
    Failed(String),
    #[error("hook timed out after {0:?}")]
    TimedOut(Duration),
}

impl HookError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Passed to every callback.
#[derive(Debug, Clone)]
pub struct HookContext {
    /// Cancelled when the owning [`HookManager`] is destroyed.
    pub signal: CancellationToken,
}

/// Return type of every hook callback.
pub type HookResult = Result<HookOutput, HookError>;

#[async_trait]
pub trait HookCallback: Send + Sync {
    async fn call(
        &self,
        input: &HookInput,
        tool_call_id: Option<&str>,
        context: HookContext,
    ) -> HookResult;
}

#[async_trait]
impl<F> HookCallback for F
where
    F: Fn(&HookInput, Option<&str>) -> HookResult + Send + Sync,
{
    async fn call(
        &self,
        input: &HookInput,
        tool_call_id: Option<&str>,
        _context: HookContext,
    ) -> HookResult {
        self(input, tool_call_id)
    }
}
