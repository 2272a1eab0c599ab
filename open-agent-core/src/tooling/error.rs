use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool '{0}' not found")]
    NotFound(String),
    #[error("invalid input for tool '{tool}': {reason}")]
    InvalidInput { tool: String, reason: String },
    #[error("{0}")]
    Execution(String),
    #[error("tool '{0}' was cancelled")]
    Cancelled(String),
}

impl ToolError {
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    pub fn invalid_input(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            tool: tool.into(),
            reason: reason.into(),
        }
    }
}
