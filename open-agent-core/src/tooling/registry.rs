use super::Tool;
use crate::types::ToolDefinition;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Ordered, name-indexed tool collection.
///
/// Registration order is the order tools are advertised to the provider.
/// Registering a name twice replaces the earlier tool in place.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.register(Arc::new(tool));
        self
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        match self.tools.iter_mut().find(|t| t.name() == tool.name()) {
            Some(slot) => *slot = tool,
            None => self.tools.push(tool),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name() == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Keep only the tools named in `allowed`. `None` keeps everything.
    pub fn filtered(&self, allowed: Option<&[String]>) -> Self {
        let Some(allowed) = allowed else {
            return self.clone();
        };
        let allowed: HashSet<&str> = allowed.iter().map(String::as_str).collect();
        Self {
            tools: self
                .tools
                .iter()
                .filter(|t| allowed.contains(t.name()))
                .cloned()
                .collect(),
        }
    }

    /// Copy of the registry without the named tool.
    pub fn without(&self, name: &str) -> Self {
        Self {
            tools: self
                .tools
                .iter()
                .filter(|t| t.name() != name)
                .cloned()
                .collect(),
        }
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect()
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}
