use super::HookCallback;
use regex::Regex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Callbacks optionally scoped to a tool-name pattern.
///
/// Patterns match the whole tool name: `*` matches everything, `Write|Edit`
/// matches either name, and any other regular expression is anchored. A
/// pattern that is not a valid expression matches its literal text only.
#[derive(Clone)]
pub struct HookMatcher {
    pattern: Option<String>,
    regex: Option<Regex>,
    pub(crate) hooks: Vec<Arc<dyn HookCallback>>,
    pub(crate) timeout: Option<Duration>,
}

impl HookMatcher {
    /// Callbacks that run for every emission of the event.
    pub fn global() -> Self {
        Self {
            pattern: None,
            regex: None,
            hooks: Vec::new(),
            timeout: None,
        }
    }

    /// Callbacks that only run for tools matching `pattern`.
    pub fn for_tools(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        let regex = Regex::new(&format!("^(?:{pattern})$")).ok();
        Self {
            pattern: Some(pattern),
            regex,
            hooks: Vec::new(),
            timeout: None,
        }
    }

    pub fn hook(mut self, callback: impl HookCallback + 'static) -> Self {
        self.hooks.push(Arc::new(callback));
        self
    }

    pub fn hook_arc(mut self, callback: Arc<dyn HookCallback>) -> Self {
        self.hooks.push(callback);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_deref()
    }

    pub fn is_global(&self) -> bool {
        self.pattern.is_none()
    }

    pub fn matches(&self, tool_name: &str) -> bool {
        match self.pattern.as_deref() {
            None | Some("") | Some("*") => true,
            Some(pattern) => match &self.regex {
                Some(regex) => regex.is_match(tool_name),
                None => pattern == tool_name,
            },
        }
    }
}

impl fmt::Debug for HookMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookMatcher")
            .field("pattern", &self.pattern)
            .field("hooks", &self.hooks.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patterns_match_whole_tool_name() {
        assert!(HookMatcher::global().matches("Anything"));
        assert!(HookMatcher::for_tools("*").matches("Bash"));

        let edits = HookMatcher::for_tools("Write|Edit");
        assert!(edits.matches("Write"));
        assert!(edits.matches("Edit"));
        assert!(!edits.matches("MultiEdit"));

        let mcp = HookMatcher::for_tools("mcp__.*");
        assert!(mcp.matches("mcp__github__list"));
        assert!(!mcp.matches("Read"));
    }

    #[test]
    fn invalid_expression_falls_back_to_literal() {
        let matcher = HookMatcher::for_tools("Read(");
        assert!(matcher.matches("Read("));
        assert!(!matcher.matches("Read"));
    }
}
