use crate::error::StorageError;
use crate::record::{LogEntry, SessionHeader, SessionRecord, SessionSummary};
use crate::storage::{SessionStorage, sort_recent_first, validate_session_id};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct StoredLog {
    header: SessionHeader,
    lines: Vec<Value>,
    summary: SessionSummary,
}

/// Process-local storage with the same semantics as [`crate::FileStorage`].
///
/// Messages are kept in serialized form so `load` exercises the same
/// deserialization path as the file backend.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    logs: Mutex<HashMap<String, StoredLog>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.logs.lock().map(|logs| logs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_logs<T>(&self, f: impl FnOnce(&mut HashMap<String, StoredLog>) -> T) -> T {
        let mut guard = match self.logs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

#[async_trait]
impl<M: LogEntry> SessionStorage<M> for MemoryStorage {
    async fn save(&self, record: &SessionRecord<M>) -> Result<(), StorageError> {
        validate_session_id(record.id())?;
        let lines = record
            .messages
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        let stored = StoredLog {
            header: record.header.clone(),
            lines,
            summary: record.summary(),
        };
        self.with_logs(|logs| logs.insert(record.id().to_string(), stored));
        Ok(())
    }

    async fn append(&self, session_id: &str, message: &M) -> Result<(), StorageError> {
        validate_session_id(session_id)?;
        let line = serde_json::to_value(message)?;
        self.with_logs(|logs| {
            if let Some(log) = logs.get_mut(session_id) {
                log.lines.push(line);
            }
        });
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionRecord<M>>, StorageError> {
        validate_session_id(session_id)?;
        let Some(stored) = self.with_logs(|logs| logs.get(session_id).cloned()) else {
            return Ok(None);
        };
        let messages = stored
            .lines
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<M>, _>>()?;
        Ok(Some(SessionRecord::new(stored.header, messages)))
    }

    async fn delete(&self, session_id: &str) -> Result<bool, StorageError> {
        validate_session_id(session_id)?;
        Ok(self.with_logs(|logs| logs.remove(session_id).is_some()))
    }

    async fn list(&self) -> Result<Vec<SessionSummary>, StorageError> {
        let mut summaries =
            self.with_logs(|logs| logs.values().map(|log| log.summary.clone()).collect::<Vec<_>>());
        sort_recent_first(&mut summaries);
        Ok(summaries)
    }
}
