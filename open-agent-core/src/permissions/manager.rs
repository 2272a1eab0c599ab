use super::{
    ApprovalContext, ApprovalHandler, PermissionDecision, PermissionError, PermissionMode,
    is_edit_tool, is_sensitive,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A tool call observed while in plan mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanLogEntry {
    pub tool_name: String,
    pub input: Value,
    pub timestamp: DateTime<Utc>,
}

/// Per-call permission decisions.
///
/// Mode and restriction changes apply to every later call immediately.
pub struct PermissionManager {
    mode: RwLock<PermissionMode>,
    allow_bypass: bool,
    approval: Option<Arc<dyn ApprovalHandler>>,
    restriction: RwLock<Option<HashSet<String>>>,
    plan_log: Mutex<Vec<PlanLogEntry>>,
    signal: CancellationToken,
}

impl PermissionManager {
    /// Fails when `mode` is `bypassPermissions` and `allow_bypass` is unset.
    pub fn new(mode: PermissionMode, allow_bypass: bool) -> Result<Self, PermissionError> {
        ensure_bypass_allowed(mode, allow_bypass)?;
        Ok(Self {
            mode: RwLock::new(mode),
            allow_bypass,
            approval: None,
            restriction: RwLock::new(None),
            plan_log: Mutex::new(Vec::new()),
            signal: CancellationToken::new(),
        })
    }

    pub fn with_approval(mut self, handler: Arc<dyn ApprovalHandler>) -> Self {
        self.approval = Some(handler);
        self
    }

    pub fn mode(&self) -> PermissionMode {
        *self.mode.read().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set_mode(&self, mode: PermissionMode) -> Result<(), PermissionError> {
        ensure_bypass_allowed(mode, self.allow_bypass)?;
        let mut current = self.mode.write().unwrap_or_else(|p| p.into_inner());
        if *current != mode {
            info!(from = %*current, to = %mode, "Permission mode changed");
        }
        *current = mode;
        Ok(())
    }

    /// Narrow the usable tools, e.g. while a pre-authored instruction is active.
    pub fn set_restriction(&self, tools: Option<Vec<String>>) {
        let mut restriction = self.restriction.write().unwrap_or_else(|p| p.into_inner());
        *restriction = tools.map(|names| names.into_iter().collect());
    }

    pub fn restriction(&self) -> Option<Vec<String>> {
        let restriction = self.restriction.read().unwrap_or_else(|p| p.into_inner());
        restriction.as_ref().map(|set| {
            let mut names: Vec<String> = set.iter().cloned().collect();
            names.sort();
            names
        })
    }

    /// Every call seen in plan mode, in order.
    pub fn plan_log(&self) -> Vec<PlanLogEntry> {
        self.lock_plan_log().clone()
    }

    pub fn clear_plan_log(&self) {
        self.lock_plan_log().clear();
    }

    /// Cancel the signal handed to approval handlers.
    pub fn destroy(&self) {
        self.signal.cancel();
    }

    pub async fn check(&self, tool_name: &str, input: Value) -> PermissionDecision {
        if let Some(restriction) = self
            .restriction
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            && !restriction.contains(tool_name)
        {
            debug!(tool = tool_name, "Tool outside active restriction list");
            return PermissionDecision::deny(format!("{tool_name} not allowed"));
        }

        match self.mode() {
            PermissionMode::BypassPermissions => return PermissionDecision::allow(input),
            PermissionMode::Plan => {
                self.lock_plan_log().push(PlanLogEntry {
                    tool_name: tool_name.to_string(),
                    input,
                    timestamp: Utc::now(),
                });
                debug!(tool = tool_name, "Tool call recorded in plan mode");
                return PermissionDecision::deny("blocked in plan mode");
            }
            PermissionMode::AcceptEdits if is_edit_tool(tool_name) => {
                return PermissionDecision::allow(input);
            }
            PermissionMode::AcceptEdits | PermissionMode::Default => {}
        }

        if !is_sensitive(tool_name) {
            return PermissionDecision::allow(input);
        }

        match &self.approval {
            Some(handler) => {
                let context = ApprovalContext {
                    signal: self.signal.clone(),
                };
                let decision = handler.request(tool_name, &input, context).await;
                debug!(
                    tool = tool_name,
                    allowed = decision.is_allowed(),
                    "Approval handler decided"
                );
                decision
            }
            None => PermissionDecision::deny(format!("Permission denied: {tool_name}")),
        }
    }

    fn lock_plan_log(&self) -> MutexGuard<'_, Vec<PlanLogEntry>> {
        self.plan_log.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl fmt::Debug for PermissionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionManager")
            .field("mode", &self.mode())
            .field("allow_bypass", &self.allow_bypass)
            .field("has_approval", &self.approval.is_some())
            .field("restriction", &self.restriction())
            .finish()
    }
}

fn ensure_bypass_allowed(mode: PermissionMode, allow_bypass: bool) -> Result<(), PermissionError> {
    if mode == PermissionMode::BypassPermissions && !allow_bypass {
        return Err(PermissionError::BypassNotAllowed);
    }
    Ok(())
}
