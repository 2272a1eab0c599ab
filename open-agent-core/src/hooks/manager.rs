use super::{HookContext, HookError, HookEvent, HookInput, HookMatcher, HookOutput};
use crate::error::panic_message;
use futures::FutureExt;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Ordered, matcher-filtered dispatch of hook callbacks.
pub struct HookManager {
    matchers: HashMap<HookEvent, Vec<HookMatcher>>,
    signal: CancellationToken,
}

impl Default for HookManager {
    fn default() -> Self {
        Self::new()
    }
}

impl HookManager {
    pub fn new() -> Self {
        Self {
            matchers: HashMap::new(),
            signal: CancellationToken::new(),
        }
    }

    pub fn with(mut self, event: HookEvent, matcher: HookMatcher) -> Self {
        self.register(event, matcher);
        self
    }

    pub fn register(&mut self, event: HookEvent, matcher: HookMatcher) {
        self.matchers.entry(event).or_default().push(matcher);
    }

    pub fn has_hooks(&self, event: HookEvent) -> bool {
        self.matchers
            .get(&event)
            .is_some_and(|matchers| matchers.iter().any(|m| !m.hooks.is_empty()))
    }

    /// Cancel the signal handed to callbacks.
    pub fn destroy(&self) {
        self.signal.cancel();
    }

    pub fn is_destroyed(&self) -> bool {
        self.signal.is_cancelled()
    }

    /// Run every callback registered for the input's event.
    pub async fn emit(&self, input: &HookInput, tool_call_id: Option<&str>) -> Vec<HookOutput> {
        self.dispatch(input, None, tool_call_id).await
    }

    /// Run global callbacks plus those whose pattern matches `tool_name`.
    pub async fn emit_for_tool(
        &self,
        input: &HookInput,
        tool_name: &str,
        tool_call_id: Option<&str>,
    ) -> Vec<HookOutput> {
        self.dispatch(input, Some(tool_name), tool_call_id).await
    }

    async fn dispatch(
        &self,
        input: &HookInput,
        tool_name: Option<&str>,
        tool_call_id: Option<&str>,
    ) -> Vec<HookOutput> {
        let event = input.event();
        let Some(matchers) = self.matchers.get(&event) else {
            return Vec::new();
        };

        let mut results = Vec::new();
        for matcher in matchers {
            if let Some(tool) = tool_name
                && !matcher.matches(tool)
            {
                continue;
            }
            for callback in &matcher.hooks {
                let context = HookContext {
                    signal: self.signal.clone(),
                };
                let call = AssertUnwindSafe(callback.call(input, tool_call_id, context))
                    .catch_unwind();
                let caught = match matcher.timeout {
                    Some(limit) => match tokio::time::timeout(limit, call).await {
                        Ok(caught) => caught,
                        Err(_) => Ok(Err(HookError::TimedOut(limit))),
                    },
                    None => call.await,
                };
                let outcome = caught.unwrap_or_else(|panic| {
                    Err(HookError::failed(format!(
                        "hook callback panicked: {}",
                        panic_message(&*panic)
                    )))
                });
                match outcome {
                    Ok(output) => results.push(output),
                    Err(err) => {
                        warn!(
                            event = ?event,
                            pattern = matcher.pattern(),
                            error = %err,
                            "Hook callback failed"
                        );
                        results.push(HookOutput::failed(err.to_string()));
                    }
                }
            }
        }
        debug!(event = ?event, callbacks = results.len(), "Hooks dispatched");
        results
    }
}

impl fmt::Debug for HookManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut events: Vec<_> = self
            .matchers
            .iter()
            .map(|(event, matchers)| (*event, matchers.len()))
            .collect();
        events.sort_by_key(|(event, _)| format!("{event:?}"));
        f.debug_struct("HookManager")
            .field("matchers", &events)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{HookCallback, HookPayload, HookResult};
    use crate::permissions::PermissionMode;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn session_start() -> HookInput {
        HookInput {
            session_id: "s1".into(),
            cwd: "/work".into(),
            permission_mode: PermissionMode::Default,
            payload: HookPayload::SessionStart {
                source: "startup".into(),
            },
        }
    }

    struct Slow;

    #[async_trait]
    impl HookCallback for Slow {
        async fn call(
            &self,
            _input: &HookInput,
            _tool_call_id: Option<&str>,
            _context: HookContext,
        ) -> Result<HookOutput, HookError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(HookOutput::default())
        }
    }

    #[tokio::test]
    async fn failing_callback_does_not_stop_the_rest() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let second = order.clone();
        let manager = HookManager::new().with(
            HookEvent::SessionStart,
            HookMatcher::global()
                .hook(|_: &HookInput, _: Option<&str>| -> HookResult {
                    Err(HookError::failed("boom"))
                })
                .hook(move |_: &HookInput, _: Option<&str>| -> HookResult {
                    second.lock().unwrap().push("second");
                    Ok(HookOutput::default())
                }),
        );

        let results = manager.emit(&session_start(), None).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0], HookOutput::failed("boom"));
        assert!(results[1].continue_);
        assert_eq!(*order.lock().unwrap(), vec!["second"]);
    }

    #[tokio::test]
    async fn panicking_callback_is_reported_as_failure() {
        let manager = HookManager::new().with(
            HookEvent::SessionStart,
            HookMatcher::global()
                .hook(|_: &HookInput, _: Option<&str>| -> HookResult {
                    panic!("hook exploded")
                })
                .hook(|_: &HookInput, _: Option<&str>| -> HookResult {
                    Ok(HookOutput::default())
                }),
        );

        let results = manager.emit(&session_start(), None).await;

        assert_eq!(results.len(), 2);
        assert!(!results[0].continue_);
        assert_eq!(
            results[0].reason.as_deref(),
            Some("hook callback panicked: hook exploded")
        );
        assert!(results[1].continue_);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_callback_is_reported_as_failure() {
        let manager = HookManager::new().with(
            HookEvent::SessionStart,
            HookMatcher::global()
                .hook(Slow)
                .with_timeout(Duration::from_millis(50)),
        );

        let results = manager.emit(&session_start(), None).await;

        assert_eq!(results.len(), 1);
        assert!(!results[0].continue_);
        assert!(results[0].reason.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn events_without_registrations_yield_nothing() {
        let manager = HookManager::new();
        assert!(manager.emit(&session_start(), None).await.is_empty());
        assert!(!manager.has_hooks(HookEvent::SessionStart));
        manager.destroy();
        assert!(manager.is_destroyed());
    }
}
