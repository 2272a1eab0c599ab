// Policy engine tests
//
// Decision matrix over (mode, tool class), restriction lists and the
// construction-time bypass check.

use open_agent_core::{
    ApprovalContext, ApprovalHandler, PermissionDecision, PermissionError, PermissionManager,
    PermissionMode,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct CountingApprover {
    calls: AtomicUsize,
    allow: bool,
}

#[async_trait::async_trait]
impl ApprovalHandler for CountingApprover {
    async fn request(
        &self,
        tool_name: &str,
        input: &Value,
        context: ApprovalContext,
    ) -> PermissionDecision {
        assert!(!context.signal.is_cancelled());
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.allow {
            PermissionDecision::allow(input.clone())
        } else {
            PermissionDecision::deny(format!("user rejected {tool_name}"))
        }
    }
}

fn manager(mode: PermissionMode) -> PermissionManager {
    PermissionManager::new(mode, true).expect("valid mode")
}

#[tokio::test]
async fn default_mode_allows_non_sensitive_and_denies_sensitive_without_handler() {
    let manager = manager(PermissionMode::Default);
    let input = json!({"file_path": "a"});

    assert_eq!(
        manager.check("Read", input.clone()).await,
        PermissionDecision::allow(input.clone())
    );
    for tool in ["Bash", "Write", "Edit", "WebSearch", "WebFetch"] {
        assert_eq!(
            manager.check(tool, input.clone()).await,
            PermissionDecision::deny(format!("Permission denied: {tool}")),
        );
    }
}

#[tokio::test]
async fn default_mode_returns_handler_decision_verbatim() {
    let approver = Arc::new(CountingApprover {
        calls: AtomicUsize::new(0),
        allow: false,
    });
    let manager = manager(PermissionMode::Default).with_approval(approver.clone());

    let decision = manager.check("Bash", json!({"command": "ls"})).await;

    assert_eq!(decision, PermissionDecision::deny("user rejected Bash"));
    assert_eq!(approver.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn accept_edits_allows_edit_tools_only() {
    let approver = Arc::new(CountingApprover {
        calls: AtomicUsize::new(0),
        allow: false,
    });
    let manager = manager(PermissionMode::AcceptEdits).with_approval(approver.clone());

    for tool in ["Write", "Edit", "MultiEdit", "NotebookEdit"] {
        assert!(manager.check(tool, json!({})).await.is_allowed(), "{tool}");
    }
    assert_eq!(approver.calls.load(Ordering::SeqCst), 0);

    assert!(!manager.check("Bash", json!({})).await.is_allowed());
    assert_eq!(approver.calls.load(Ordering::SeqCst), 1);
    assert!(manager.check("Glob", json!({})).await.is_allowed());
}

#[tokio::test]
async fn bypass_allows_everything() {
    let manager = manager(PermissionMode::BypassPermissions);
    for tool in ["Bash", "Write", "Read", "WebFetch"] {
        let input = json!({"tool": tool});
        assert_eq!(
            manager.check(tool, input.clone()).await,
            PermissionDecision::allow(input)
        );
    }
}

#[tokio::test]
async fn plan_mode_denies_and_logs_one_entry_per_call() {
    let manager = manager(PermissionMode::Plan);
    let calls = [
        ("Read", json!({"file_path": "a"})),
        ("Bash", json!({"command": "ls"})),
        ("Read", json!({"file_path": "a"})),
    ];

    for (expected_len, (tool, input)) in calls.iter().enumerate() {
        let decision = manager.check(tool, input.clone()).await;
        assert_eq!(decision, PermissionDecision::deny("blocked in plan mode"));
        assert_eq!(manager.plan_log().len(), expected_len + 1);
    }

    let log = manager.plan_log();
    assert_eq!(log[1].tool_name, "Bash");
    assert_eq!(log[1].input, json!({"command": "ls"}));
    assert!(log[0].timestamp <= log[2].timestamp);

    manager.clear_plan_log();
    assert!(manager.plan_log().is_empty());
}

#[test]
fn bypass_without_flag_fails_at_construction() {
    let result = PermissionManager::new(PermissionMode::BypassPermissions, false);
    assert!(matches!(result, Err(PermissionError::BypassNotAllowed)));
}

#[tokio::test]
async fn restriction_is_checked_before_any_mode() {
    for mode in [
        PermissionMode::Default,
        PermissionMode::AcceptEdits,
        PermissionMode::BypassPermissions,
        PermissionMode::Plan,
    ] {
        let manager = manager(mode);
        manager.set_restriction(Some(vec!["Read".into()]));
        assert_eq!(
            manager.check("Bash", json!({})).await,
            PermissionDecision::deny("Bash not allowed"),
            "{mode}"
        );
    }
}

#[tokio::test]
async fn restriction_narrows_accept_edits_auto_allow() {
    let manager = manager(PermissionMode::AcceptEdits);
    manager.set_restriction(Some(vec!["Read".into(), "Edit".into()]));

    assert!(manager.check("Edit", json!({})).await.is_allowed());
    assert_eq!(
        manager.check("Write", json!({})).await,
        PermissionDecision::deny("Write not allowed")
    );

    manager.set_restriction(None);
    assert!(manager.check("Write", json!({})).await.is_allowed());
}

#[tokio::test]
async fn restriction_never_widens_approval() {
    let manager = manager(PermissionMode::Default);
    manager.set_restriction(Some(vec!["Bash".into()]));
    assert_eq!(
        manager.check("Bash", json!({})).await,
        PermissionDecision::deny("Permission denied: Bash")
    );
}

#[tokio::test]
async fn mode_changes_apply_to_the_next_call() {
    let manager = manager(PermissionMode::Default);
    assert!(!manager.check("Write", json!({})).await.is_allowed());

    manager.set_mode(PermissionMode::AcceptEdits).unwrap();
    assert!(manager.check("Write", json!({})).await.is_allowed());

    manager.set_mode(PermissionMode::Plan).unwrap();
    assert!(!manager.check("Write", json!({})).await.is_allowed());
    assert_eq!(manager.plan_log().len(), 1);
}
