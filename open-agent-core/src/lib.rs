//! # open-agent-core
//!
//! Orchestration engine for tool-using LLM agents.
//!
//! ## Layers (leaves first)
//!
//! - [`permissions`] - per-call policy decisions
//! - [`hooks`] - ordered interceptor callbacks at lifecycle events
//! - [`agent`] - the bounded ReAct loop over a [`provider::Provider`]
//! - [`session`] - single-flight multi-turn wrapper with a durable log
//!
//! ## Quick start
//!
//! ```no_run
//! use open_agent_core::{AgentOptions, Session};
//! # async fn demo(provider: std::sync::Arc<dyn open_agent_core::Provider>) -> Result<(), open_agent_core::SessionError> {
//! let session = Session::builder(provider)
//!     .options(AgentOptions::new().with_max_turns(5))
//!     .build()?;
//! session.send("list the files in src").await?;
//! let _result = session.stream()?.result().await?;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod hooks;
pub mod logging;
pub mod permissions;
pub mod provider;
pub mod session;
pub mod tooling;
pub mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use agent::{AgentLoop, AgentLoopBuilder, EventStream};
pub use config::{AgentOptions, ConfigError, McpServerConfig, OutputFormat, load_options};
pub use error::AgentError;
pub use hooks::{
    HookCallback, HookContext, HookDecision, HookError, HookEvent, HookInput, HookManager,
    HookMatcher, HookOutput, HookPayload, HookResult,
};
pub use permissions::{
    ApprovalContext, ApprovalHandler, PermissionDecision, PermissionError, PermissionManager,
    PermissionMode, PlanLogEntry,
};
pub use provider::{ChatRequest, ChunkStream, Provider, ProviderError, StreamChunk};
pub use session::{Session, SessionBuilder, SessionError, SessionState, SessionStream};
pub use tooling::{AgentDefinition, TASK_TOOL_NAME, Tool, ToolContext, ToolError, ToolRegistry};
pub use types::{
    AssistantMessage, Message, ResultMessage, ResultOutcome, StopReason, StreamEvent,
    SystemMessage, ToolCall, ToolResultMessage, Usage, UserMessage,
};

pub use open_agent_session::{FileStorage, MemoryStorage, SessionStorage, StorageError};
