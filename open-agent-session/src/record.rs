use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A message type that can be written to a session log.
pub trait LogEntry: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Text of the entry when it is a user prompt.
    ///
    /// The first prompt of a session is shown in the project index.
    fn prompt_text(&self) -> Option<&str>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum HeaderKind {
    #[serde(rename = "session_header")]
    SessionHeader,
}

/// First line of every session log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHeader {
    #[serde(rename = "type")]
    kind: HeaderKind,
    pub id: String,
    pub model: String,
    pub provider: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub options: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forked_at: Option<DateTime<Utc>>,
}

impl SessionHeader {
    pub fn new(id: impl Into<String>, model: impl Into<String>, provider: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            kind: HeaderKind::SessionHeader,
            id: id.into(),
            model: model.into(),
            provider: provider.into(),
            created_at: now,
            updated_at: now,
            options: Value::Null,
            parent_session_id: None,
            forked_at: None,
        }
    }

    pub fn with_options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }

    pub fn forked_from(mut self, parent: impl Into<String>, at: DateTime<Utc>) -> Self {
        self.parent_session_id = Some(parent.into());
        self.forked_at = Some(at);
        self
    }
}

/// Persisted form of a session: header plus ordered history.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord<M> {
    pub header: SessionHeader,
    pub messages: Vec<M>,
}

impl<M: LogEntry> SessionRecord<M> {
    pub fn new(header: SessionHeader, messages: Vec<M>) -> Self {
        Self { header, messages }
    }

    pub fn id(&self) -> &str {
        &self.header.id
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.header.id.clone(),
            first_prompt: self
                .messages
                .iter()
                .find_map(|message| message.prompt_text())
                .map(summarise_prompt),
            message_count: self.messages.len(),
            created: self.header.created_at,
            modified: self.header.updated_at,
        }
    }
}

/// One row of the per-project index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    #[serde(default)]
    pub first_prompt: Option<String>,
    pub message_count: usize,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

/// Per-project index document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectIndex {
    pub project_path: String,
    #[serde(default)]
    pub sessions: Vec<SessionSummary>,
}

impl ProjectIndex {
    pub fn new(project_path: impl Into<String>) -> Self {
        Self {
            project_path: project_path.into(),
            sessions: Vec::new(),
        }
    }

    /// Insert or replace the row for `summary.id`.
    pub fn upsert(&mut self, summary: SessionSummary) {
        match self.sessions.iter_mut().find(|row| row.id == summary.id) {
            Some(row) => *row = summary,
            None => self.sessions.push(summary),
        }
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.sessions.len();
        self.sessions.retain(|row| row.id != id);
        before != self.sessions.len()
    }
}

const PROMPT_PREVIEW_CHARS: usize = 120;

fn summarise_prompt(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= PROMPT_PREVIEW_CHARS {
        return trimmed.to_string();
    }
    let mut preview: String = trimmed.chars().take(PROMPT_PREVIEW_CHARS).collect();
    preview.push('…');
    preview
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_serializes_with_type_tag() {
        let header = SessionHeader::new("abc", "model-x", "anthropic");
        let value = serde_json::to_value(&header).unwrap();

        assert_eq!(value["type"], "session_header");
        assert_eq!(value["id"], "abc");
        assert!(value.get("parentSessionId").is_none());
        assert!(value.get("createdAt").is_some());
    }

    #[test]
    fn header_rejects_other_type_tags() {
        let raw = r#"{"type":"user","id":"a","model":"m","provider":"p","createdAt":"2024-01-01T00:00:00Z","updatedAt":"2024-01-01T00:00:00Z"}"#;
        assert!(serde_json::from_str::<SessionHeader>(raw).is_err());
    }

    #[test]
    fn index_upsert_replaces_existing_row() {
        let now = Utc::now();
        let mut index = ProjectIndex::new("/tmp/project");
        let row = SessionSummary {
            id: "s1".into(),
            first_prompt: Some("hello".into()),
            message_count: 1,
            created: now,
            modified: now,
        };
        index.upsert(row.clone());
        index.upsert(SessionSummary {
            message_count: 4,
            ..row
        });

        assert_eq!(index.sessions.len(), 1);
        assert_eq!(index.sessions[0].message_count, 4);
        assert!(index.remove("s1"));
        assert!(!index.remove("s1"));
    }

    #[test]
    fn long_prompts_are_truncated_in_preview() {
        let long = "x".repeat(300);
        let preview = summarise_prompt(&long);
        assert_eq!(preview.chars().count(), PROMPT_PREVIEW_CHARS + 1);
        assert!(preview.ends_with('…'));
    }
}
