use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by session log backends.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to access session log at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize session data: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid session id '{0}'")]
    InvalidId(String),

    #[error("session log at {path:?} has a corrupt header: {reason}")]
    CorruptHeader { path: PathBuf, reason: String },

    #[error("session log at {path:?} has a corrupt entry on line {line}: {reason}")]
    CorruptEntry {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
