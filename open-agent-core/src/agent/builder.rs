use super::{AgentLoop, LoopInner};
use crate::checkpoint::FileCheckpointer;
use crate::config::{AgentOptions, ConfigError};
use crate::error::AgentError;
use crate::hooks::HookManager;
use crate::permissions::{ApprovalHandler, PermissionManager};
use crate::provider::Provider;
use crate::tooling::{TASK_TOOL_NAME, TaskTool, Tool, ToolRegistry};
use crate::types::new_message_id;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tracing::info;

/// Configures an [`AgentLoop`]. Configuration is fixed once built.
pub struct AgentLoopBuilder {
    provider: Arc<dyn Provider>,
    options: AgentOptions,
    tools: ToolRegistry,
    hooks: Option<Arc<HookManager>>,
    approval: Option<Arc<dyn ApprovalHandler>>,
    permissions: Option<Arc<PermissionManager>>,
    session_id: Option<String>,
    resumed: bool,
    nested: bool,
}

impl AgentLoopBuilder {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            options: AgentOptions::default(),
            tools: ToolRegistry::new(),
            hooks: None,
            approval: None,
            permissions: None,
            session_id: None,
            resumed: false,
            nested: false,
        }
    }

    pub fn options(mut self, options: AgentOptions) -> Self {
        self.options = options;
        self
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.register(Arc::new(tool));
        self
    }

    pub fn hooks(self, hooks: HookManager) -> Self {
        self.shared_hooks(Arc::new(hooks))
    }

    pub fn shared_hooks(mut self, hooks: Arc<HookManager>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn approval(mut self, handler: impl ApprovalHandler + 'static) -> Self {
        self.approval = Some(Arc::new(handler));
        self
    }

    pub fn approval_arc(mut self, handler: Arc<dyn ApprovalHandler>) -> Self {
        self.approval = Some(handler);
        self
    }

    /// Reuse an existing policy engine instead of building one from the options.
    pub fn shared_permissions(mut self, permissions: Arc<PermissionManager>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Mark the loop as continuing an existing session.
    pub fn resumed(mut self, resumed: bool) -> Self {
        self.resumed = resumed;
        self
    }

    pub(crate) fn nested(mut self) -> Self {
        self.nested = true;
        self
    }

    pub fn build(self) -> Result<AgentLoop, AgentError> {
        let options = self.options;
        options.validate()?;

        let permissions = match self.permissions {
            Some(permissions) => permissions,
            None => {
                let mut manager = PermissionManager::new(
                    options.permission_mode,
                    options.allow_bypass_permissions,
                )?;
                if let Some(handler) = self.approval {
                    manager = manager.with_approval(handler);
                }
                Arc::new(manager)
            }
        };
        let hooks = self
            .hooks
            .unwrap_or_else(|| Arc::new(HookManager::new()));

        let mut tools = self.tools.filtered(options.allowed_tools.as_deref());
        let task_allowed = options
            .allowed_tools
            .as_ref()
            .is_none_or(|allowed| allowed.iter().any(|name| name == TASK_TOOL_NAME));
        if !self.nested && !options.agents.is_empty() && task_allowed {
            let task = TaskTool::new(
                self.provider.clone(),
                tools.without(TASK_TOOL_NAME),
                permissions.clone(),
                hooks.clone(),
                options.clone(),
            );
            tools.register(Arc::new(task));
        }

        let output_validator = match options.output_schema() {
            Some(schema) => Some(
                jsonschema::validator_for(schema)
                    .map_err(|err| ConfigError::InvalidOutputSchema(err.to_string()))?,
            ),
            None => None,
        };
        let checkpoints = options
            .enable_file_checkpointing
            .then(FileCheckpointer::new);
        let session_id = self.session_id.unwrap_or_else(new_message_id);

        if !self.nested {
            info!(
                session_id = session_id.as_str(),
                provider = self.provider.name(),
                tools = tools.len(),
                max_turns = options.max_turns,
                mode = %permissions.mode(),
                "Agent loop configured"
            );
        }

        Ok(AgentLoop {
            inner: Arc::new(LoopInner {
                session_id,
                options,
                provider: self.provider,
                tools,
                permissions,
                hooks,
                output_validator,
                checkpoints,
                nested: self.nested,
                resumed: self.resumed,
                started: AtomicBool::new(false),
            }),
        })
    }
}
