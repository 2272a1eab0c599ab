//! # Permissions
//!
//! The policy engine deciding, per tool call, whether execution proceeds.
//!
//! Decision order for every call:
//! 1. an active restriction list denies tools it does not name
//! 2. the mode decides: `bypassPermissions` allows, `plan` records and denies,
//!    `acceptEdits` allows edit-class tools
//! 3. non-sensitive tools are allowed
//! 4. sensitive tools go to the approval handler, or are denied without one

mod manager;

pub use manager::{PermissionManager, PlanLogEntry};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Tools whose side effects need approval under the default policy.
pub const SENSITIVE_TOOLS: &[&str] = &["Bash", "Write", "Edit", "WebSearch", "WebFetch"];

/// Tools auto-approved in `acceptEdits` mode.
pub const EDIT_TOOLS: &[&str] = &["Write", "Edit", "MultiEdit", "NotebookEdit"];

pub fn is_sensitive(tool_name: &str) -> bool {
    SENSITIVE_TOOLS.contains(&tool_name)
}

pub fn is_edit_tool(tool_name: &str) -> bool {
    EDIT_TOOLS.contains(&tool_name)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PermissionMode {
    #[default]
    #[serde(rename = "default")]
    Default,
    #[serde(rename = "acceptEdits")]
    AcceptEdits,
    #[serde(rename = "bypassPermissions")]
    BypassPermissions,
    #[serde(rename = "plan")]
    Plan,
}

impl PermissionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PermissionMode::Default => "default",
            PermissionMode::AcceptEdits => "acceptEdits",
            PermissionMode::BypassPermissions => "bypassPermissions",
            PermissionMode::Plan => "plan",
        }
    }
}

impl fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionMode {
    type Err = PermissionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "default" => Ok(PermissionMode::Default),
            "acceptEdits" => Ok(PermissionMode::AcceptEdits),
            "bypassPermissions" => Ok(PermissionMode::BypassPermissions),
            "plan" => Ok(PermissionMode::Plan),
            other => Err(PermissionError::UnknownMode(other.to_string())),
        }
    }
}

/// Outcome of a permission check. Never partial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "behavior", rename_all = "lowercase")]
pub enum PermissionDecision {
    #[serde(rename_all = "camelCase")]
    Allow { updated_input: Value },
    Deny { reason: String },
}

impl PermissionDecision {
    pub fn allow(updated_input: Value) -> Self {
        Self::Allow { updated_input }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self::Deny {
            reason: reason.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }
}

#[derive(Debug, Error)]
pub enum PermissionError {
    #[error(
        "permission mode 'bypassPermissions' requires allow_bypass_permissions to be set explicitly"
    )]
    BypassNotAllowed,
    #[error("unknown permission mode '{0}'")]
    UnknownMode(String),
}

/// Passed to approval handlers alongside the call being approved.
#[derive(Debug, Clone)]
pub struct ApprovalContext {
    /// Cancelled when the owning manager is destroyed.
    pub signal: CancellationToken,
}

/// External decision maker for sensitive tools, e.g. an interactive prompt.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    async fn request(
        &self,
        tool_name: &str,
        input: &Value,
        context: ApprovalContext,
    ) -> PermissionDecision;
}

#[async_trait]
impl<F> ApprovalHandler for F
where
    F: Fn(&str, &Value) -> PermissionDecision + Send + Sync,
{
    async fn request(
        &self,
        tool_name: &str,
        input: &Value,
        _context: ApprovalContext,
    ) -> PermissionDecision {
        self(tool_name, input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn modes_use_camel_case_names() {
        assert_eq!(
            serde_json::to_value(PermissionMode::AcceptEdits).unwrap(),
            json!("acceptEdits")
        );
        assert_eq!(
            "bypassPermissions".parse::<PermissionMode>().unwrap(),
            PermissionMode::BypassPermissions
        );
        assert!("yolo".parse::<PermissionMode>().is_err());
    }

    #[test]
    fn decision_serializes_with_behavior_tag() {
        let allow = PermissionDecision::allow(json!({"command": "ls"}));
        assert_eq!(
            serde_json::to_value(&allow).unwrap(),
            json!({"behavior": "allow", "updatedInput": {"command": "ls"}})
        );
        let deny = PermissionDecision::deny("nope");
        assert_eq!(
            serde_json::to_value(&deny).unwrap(),
            json!({"behavior": "deny", "reason": "nope"})
        );
    }

    #[test]
    fn sensitivity_sets() {
        assert!(is_sensitive("Bash"));
        assert!(!is_sensitive("Read"));
        assert!(is_edit_tool("MultiEdit"));
        assert!(!is_edit_tool("Bash"));
    }
}
