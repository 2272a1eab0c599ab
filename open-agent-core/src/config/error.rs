use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when loading or validating agent options
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("options file not found at {path:?}")]
    NotFound { path: PathBuf },

    #[error("failed to read options from {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse options from {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("maxTurns must be at least 1, got {0}")]
    InvalidMaxTurns(u32),

    #[error("outputFormat schema is not a valid JSON schema: {0}")]
    InvalidOutputSchema(String),

    #[error("subagent '{name}' has maxTurns 0")]
    InvalidAgent { name: String },

    #[error("stored options could not be decoded: {0}")]
    Stored(#[source] serde_json::Error),
}
