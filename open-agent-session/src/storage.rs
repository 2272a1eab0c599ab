use crate::error::StorageError;
use crate::record::{LogEntry, SessionRecord, SessionSummary};
use async_trait::async_trait;

/// Backend for session logs.
///
/// A given session id is written by exactly one session at a time; backends
/// do not coordinate concurrent writers.
#[async_trait]
pub trait SessionStorage<M: LogEntry>: Send + Sync {
    /// Write the full record, replacing any previous log for the same id,
    /// and upsert the project index.
    async fn save(&self, record: &SessionRecord<M>) -> Result<(), StorageError>;

    /// Append one message to an existing log.
    ///
    /// Appending to an id that was never saved is a no-op.
    async fn append(&self, session_id: &str, message: &M) -> Result<(), StorageError>;

    /// Rebuild a record by replaying its log. `None` when no log exists.
    async fn load(&self, session_id: &str) -> Result<Option<SessionRecord<M>>, StorageError>;

    /// Remove a log and its index row. Returns whether anything was removed.
    async fn delete(&self, session_id: &str) -> Result<bool, StorageError>;

    /// Summaries of every session in the project, most recently modified first.
    async fn list(&self) -> Result<Vec<SessionSummary>, StorageError>;
}

pub(crate) fn validate_session_id(id: &str) -> Result<(), StorageError> {
    let valid = !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidId(id.to_string()))
    }
}

pub(crate) fn sort_recent_first(summaries: &mut [SessionSummary]) {
    summaries.sort_by(|a, b| b.modified.cmp(&a.modified));
}
