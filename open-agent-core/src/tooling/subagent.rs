use super::{Tool, ToolContext, ToolError, ToolRegistry};
use crate::agent::AgentLoop;
use crate::config::AgentOptions;
use crate::error::AgentError;
use crate::hooks::{HookInput, HookManager, HookPayload};
use crate::permissions::PermissionManager;
use crate::provider::Provider;
use crate::types::{Message, ResultOutcome};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};

pub const TASK_TOOL_NAME: &str = "Task";

/// A named subagent reachable through the `Task` tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefinition {
    pub description: String,
    /// System prompt of the nested loop.
    pub prompt: String,
    /// Tools the subagent may use. `None` inherits the parent's tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
}

impl AgentDefinition {
    pub fn new(description: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            prompt: prompt.into(),
            tools: None,
            model: None,
            max_turns: None,
        }
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = Some(tools.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = Some(max_turns);
        self
    }
}

#[derive(Debug, Deserialize)]
struct TaskInput {
    subagent_type: String,
    prompt: String,
    #[serde(default)]
    description: Option<String>,
}

/// Delegates a sub-task to a fresh agent loop with its own history and budget.
///
/// The nested loop shares the parent's provider, policy engine and hook
/// pipeline. It never sees the `Task` tool itself.
pub struct TaskTool {
    provider: Arc<dyn Provider>,
    tools: ToolRegistry,
    permissions: Arc<PermissionManager>,
    hooks: Arc<HookManager>,
    parent: AgentOptions,
    description: String,
}

impl TaskTool {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: ToolRegistry,
        permissions: Arc<PermissionManager>,
        hooks: Arc<HookManager>,
        parent: AgentOptions,
    ) -> Self {
        let mut description = String::from("Launch a subagent to handle a task. Available agents:");
        for (name, definition) in &parent.agents {
            description.push_str(&format!("\n- {name}: {}", definition.description));
        }
        Self {
            provider,
            tools,
            permissions,
            hooks,
            parent,
            description,
        }
    }

    fn nested_options(&self, definition: &AgentDefinition) -> AgentOptions {
        AgentOptions {
            model: definition.model.clone().or_else(|| self.parent.model.clone()),
            max_turns: definition.max_turns.unwrap_or(self.parent.max_turns),
            system_prompt: Some(definition.prompt.clone()),
            allowed_tools: definition.tools.clone(),
            cwd: self.parent.cwd.clone(),
            env: self.parent.env.clone(),
            permission_mode: self.parent.permission_mode,
            allow_bypass_permissions: self.parent.allow_bypass_permissions,
            ..AgentOptions::default()
        }
    }

    async fn notify(&self, context: &ToolContext, payload: HookPayload) {
        let input = HookInput {
            session_id: context.session_id.clone(),
            cwd: self.parent.cwd.display().to_string(),
            permission_mode: self.permissions.mode(),
            payload,
        };
        self.hooks
            .emit(&input, Some(context.tool_call_id.as_str()))
            .await;
    }
}

#[async_trait]
impl Tool for TaskTool {
    fn name(&self) -> &str {
        TASK_TOOL_NAME
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        let agents: Vec<&String> = self.parent.agents.keys().collect();
        json!({
            "type": "object",
            "properties": {
                "subagent_type": { "type": "string", "enum": agents },
                "prompt": { "type": "string" },
                "description": { "type": "string" }
            },
            "required": ["subagent_type", "prompt"]
        })
    }

    async fn execute(&self, input: Value, context: ToolContext) -> Result<Value, ToolError> {
        let task: TaskInput = serde_json::from_value(input)
            .map_err(|err| ToolError::invalid_input(TASK_TOOL_NAME, err.to_string()))?;
        let definition = self.parent.agents.get(&task.subagent_type).ok_or_else(|| {
            ToolError::invalid_input(
                TASK_TOOL_NAME,
                format!("unknown subagent '{}'", task.subagent_type),
            )
        })?;

        info!(
            agent = task.subagent_type.as_str(),
            description = task.description.as_deref(),
            "Starting subagent"
        );
        self.notify(
            &context,
            HookPayload::SubagentStart {
                agent_type: task.subagent_type.clone(),
                prompt: task.prompt.clone(),
            },
        )
        .await;

        let nested = AgentLoop::builder(self.provider.clone())
            .options(self.nested_options(definition))
            .tools(self.tools.clone())
            .shared_permissions(self.permissions.clone())
            .shared_hooks(self.hooks.clone())
            .session_id(context.session_id.clone())
            .nested()
            .build()
            .map_err(|err| ToolError::execution(err.to_string()))?;

        let outcome = nested
            .run(task.prompt, Vec::new(), context.cancel.clone())
            .await;
        let messages = match outcome {
            Ok(messages) => messages,
            Err(AgentError::Cancelled) => {
                return Err(ToolError::Cancelled(TASK_TOOL_NAME.to_string()));
            }
            Err(err) => return Err(ToolError::execution(err.to_string())),
        };

        let result = messages.iter().rev().find_map(Message::as_result);
        let (text, failure) = match result {
            Some(result) if result.outcome == ResultOutcome::Success => {
                (result.result.clone(), None)
            }
            Some(result) if result.outcome == ResultOutcome::ErrorMaxTurns => (
                None,
                Some(format!(
                    "subagent '{}' exhausted its turn budget",
                    task.subagent_type
                )),
            ),
            Some(result) => (
                None,
                Some(format!(
                    "subagent '{}' failed: {}",
                    task.subagent_type,
                    result.errors.join("; ")
                )),
            ),
            None => (
                None,
                Some(format!(
                    "subagent '{}' produced no result",
                    task.subagent_type
                )),
            ),
        };

        self.notify(
            &context,
            HookPayload::SubagentStop {
                agent_type: task.subagent_type.clone(),
                result: text.clone(),
            },
        )
        .await;

        if let Some(failure) = failure {
            warn!(agent = task.subagent_type.as_str(), error = failure.as_str(), "Subagent failed");
            return Err(ToolError::execution(failure));
        }
        let turns = result.map(|r| r.turns).unwrap_or_default();
        Ok(json!({
            "result": text.unwrap_or_default(),
            "subagentType": task.subagent_type,
            "turns": turns,
        }))
    }
}
