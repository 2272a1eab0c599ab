//! # Configuration
//!
//! [`AgentOptions`] is the single configuration surface. It flows unchanged
//! from session creation into the agent loop and is stored verbatim in the
//! session header, so a resumed session is rebuilt with the same options.
//!
//! ```toml
//! maxTurns = 8
//! permissionMode = "acceptEdits"
//! allowedTools = ["Read", "Edit"]
//!
//! [agents.reviewer]
//! description = "Reviews a diff"
//! prompt = "You review code changes."
//! ```

mod error;
mod loader;

pub use error::ConfigError;
pub use loader::load_options;

use crate::permissions::PermissionMode;
use crate::tooling::AgentDefinition;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const DEFAULT_MAX_TURNS: u32 = 10;

/// Connection settings for an external tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpServerConfig {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    Sse {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    Http {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
}

/// Constraint on the shape of the final answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputFormat {
    JsonSchema { schema: Value },
}

impl OutputFormat {
    pub fn schema(&self) -> &Value {
        match self {
            OutputFormat::JsonSchema { schema } => schema,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentOptions {
    /// Overrides the provider's configured model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub max_turns: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Tools advertised to the model. `None` means every registered tool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    pub permission_mode: PermissionMode,
    pub allow_bypass_permissions: bool,
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_format: Option<OutputFormat>,
    pub enable_file_checkpointing: bool,
    pub include_partial_messages: bool,
    /// Subagents reachable through the `Task` tool.
    pub agents: BTreeMap<String, AgentDefinition>,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            model: None,
            max_turns: DEFAULT_MAX_TURNS,
            system_prompt: None,
            allowed_tools: None,
            cwd: PathBuf::from("."),
            env: BTreeMap::new(),
            permission_mode: PermissionMode::Default,
            allow_bypass_permissions: false,
            mcp_servers: BTreeMap::new(),
            output_format: None,
            enable_file_checkpointing: false,
            include_partial_messages: false,
            agents: BTreeMap::new(),
        }
    }
}

impl AgentOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_allowed_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tools = Some(tools.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_permission_mode(mut self, mode: PermissionMode) -> Self {
        self.permission_mode = mode;
        self
    }

    /// Acknowledge the risk of `bypassPermissions`.
    pub fn allow_bypass_permissions(mut self, allow: bool) -> Self {
        self.allow_bypass_permissions = allow;
        self
    }

    pub fn with_mcp_server(mut self, name: impl Into<String>, server: McpServerConfig) -> Self {
        self.mcp_servers.insert(name.into(), server);
        self
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_format = Some(OutputFormat::JsonSchema { schema });
        self
    }

    pub fn with_file_checkpointing(mut self, enabled: bool) -> Self {
        self.enable_file_checkpointing = enabled;
        self
    }

    pub fn with_partial_messages(mut self, enabled: bool) -> Self {
        self.include_partial_messages = enabled;
        self
    }

    pub fn with_agent(mut self, name: impl Into<String>, definition: AgentDefinition) -> Self {
        self.agents.insert(name.into(), definition);
        self
    }

    pub fn output_schema(&self) -> Option<&Value> {
        self.output_format.as_ref().map(OutputFormat::schema)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_turns == 0 {
            return Err(ConfigError::InvalidMaxTurns(self.max_turns));
        }
        if let Some(schema) = self.output_schema() {
            jsonschema::validator_for(schema)
                .map_err(|err| ConfigError::InvalidOutputSchema(err.to_string()))?;
        }
        if let Some((name, _)) = self
            .agents
            .iter()
            .find(|(_, definition)| definition.max_turns == Some(0))
        {
            return Err(ConfigError::InvalidAgent { name: name.clone() });
        }
        Ok(())
    }

    /// Form stored in the session header.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Rebuild options from a session header. `null` yields the defaults.
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        let options: Self = serde_json::from_value(value.clone()).map_err(ConfigError::Stored)?;
        options.validate()?;
        Ok(options)
    }
}
