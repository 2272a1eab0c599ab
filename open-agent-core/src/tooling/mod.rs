//! # Tooling
//!
//! Tools are plain I/O wrappers behind one async contract: take a JSON input,
//! return a JSON output or fail. The agent loop looks them up by name in an
//! explicit [`ToolRegistry`] passed at construction.
//!
//! - [`Tool`] - the execution contract
//! - [`ToolRegistry`] - name-indexed collection advertised to the provider
//! - [`TaskTool`] - runs a nested agent loop for a subagent

mod error;
mod registry;
mod subagent;

pub use error::ToolError;
pub use registry::ToolRegistry;
pub use subagent::{AgentDefinition, TASK_TOOL_NAME, TaskTool};

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Execution environment handed to every tool call.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub tool_call_id: String,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    /// Cancelled when the turn is interrupted. Tools may ignore it.
    pub cancel: CancellationToken,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the accepted input.
    fn input_schema(&self) -> Value {
        serde_json::json!({ "type": "object" })
    }

    async fn execute(&self, input: Value, context: ToolContext) -> Result<Value, ToolError>;
}
