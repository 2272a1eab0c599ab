//! Snapshots of files touched by edit-class tools, so a run can be rewound.

use serde_json::Value;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("failed to restore {path:?}: {source}")]
    Restore {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone)]
struct Snapshot {
    path: PathBuf,
    /// `None` when the file did not exist before the first edit.
    original: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct Snapshots {
    order: Vec<Snapshot>,
    seen: HashSet<PathBuf>,
}

/// Records the pre-edit contents of every file an edit tool targets.
///
/// Only the first edit of a path is captured, so rewinding restores the state
/// from before the run touched it.
#[derive(Debug, Default)]
pub struct FileCheckpointer {
    snapshots: Mutex<Snapshots>,
}

impl FileCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the file named by `file_path` in `input`, relative to `cwd`.
    pub async fn capture(&self, cwd: &Path, input: &Value) {
        let Some(raw) = input.get("file_path").and_then(Value::as_str) else {
            return;
        };
        let path = cwd.join(raw);

        let mut snapshots = self.snapshots.lock().await;
        if snapshots.seen.contains(&path) {
            return;
        }
        let original = match tokio::fs::read(&path).await {
            Ok(bytes) => Some(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Could not snapshot file");
                return;
            }
        };
        debug!(path = %path.display(), existed = original.is_some(), "File checkpoint taken");
        snapshots.seen.insert(path.clone());
        snapshots.order.push(Snapshot { path, original });
    }

    pub async fn len(&self) -> usize {
        self.snapshots.lock().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Restore every snapshot, newest first, and forget them.
    pub async fn rewind(&self) -> Result<usize, CheckpointError> {
        let mut snapshots = self.snapshots.lock().await;
        let taken = std::mem::take(&mut *snapshots);
        let restored = taken.order.len();

        for snapshot in taken.order.into_iter().rev() {
            let result = match &snapshot.original {
                Some(bytes) => tokio::fs::write(&snapshot.path, bytes).await,
                None => match tokio::fs::remove_file(&snapshot.path).await {
                    Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                    other => other,
                },
            };
            result.map_err(|source| CheckpointError::Restore {
                path: snapshot.path.clone(),
                source,
            })?;
        }
        debug!(files = restored, "File checkpoints rewound");
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn rewind_restores_first_snapshot_and_removes_new_files() {
        let dir = tempdir().unwrap();
        let existing = dir.path().join("notes.txt");
        std::fs::write(&existing, "v1").unwrap();

        let checkpoints = FileCheckpointer::new();
        checkpoints
            .capture(dir.path(), &json!({"file_path": "notes.txt"}))
            .await;
        std::fs::write(&existing, "v2").unwrap();
        checkpoints
            .capture(dir.path(), &json!({"file_path": "notes.txt"}))
            .await;
        std::fs::write(&existing, "v3").unwrap();

        checkpoints
            .capture(dir.path(), &json!({"file_path": "created.txt"}))
            .await;
        std::fs::write(dir.path().join("created.txt"), "new").unwrap();

        assert_eq!(checkpoints.len().await, 2);
        assert_eq!(checkpoints.rewind().await.unwrap(), 2);

        assert_eq!(std::fs::read_to_string(&existing).unwrap(), "v1");
        assert!(!dir.path().join("created.txt").exists());
        assert!(checkpoints.is_empty().await);
    }

    #[tokio::test]
    async fn input_without_path_is_ignored() {
        let checkpoints = FileCheckpointer::new();
        checkpoints
            .capture(Path::new("."), &json!({"command": "ls"}))
            .await;
        assert!(checkpoints.is_empty().await);
    }
}
