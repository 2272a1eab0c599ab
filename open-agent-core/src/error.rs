use crate::checkpoint::CheckpointError;
use crate::config::ConfigError;
use crate::permissions::PermissionError;
use std::any::Any;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    /// The caller cancelled the run. Distinct from every failure kind.
    #[error("agent run was cancelled")]
    Cancelled,
    #[error(transparent)]
    Permission(#[from] PermissionError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error("agent event channel closed before the run finished")]
    ChannelClosed,
}

impl AgentError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AgentError::Cancelled)
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}
