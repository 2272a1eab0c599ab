use crate::error::StorageError;
use crate::record::{LogEntry, ProjectIndex, SessionHeader, SessionRecord, SessionSummary};
use crate::storage::{SessionStorage, sort_recent_first, validate_session_id};
use async_trait::async_trait;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};

/// Name of the per-project index document.
pub const INDEX_FILE_NAME: &str = "sessions-index.json";

const DEFAULT_BASE_DIR: &str = "~/.open-agent/projects";
const LOG_EXTENSION: &str = "jsonl";

/// JSONL session logs grouped by project directory.
///
/// ```text
/// <base>/<encoded project path>/<session id>.jsonl
/// <base>/<encoded project path>/sessions-index.json
/// ```
#[derive(Debug, Clone)]
pub struct FileStorage {
    project_path: String,
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(base_dir: impl AsRef<Path>, project_path: impl Into<String>) -> Self {
        let project_path = project_path.into();
        let dir = base_dir.as_ref().join(encode_project_path(&project_path));
        Self { project_path, dir }
    }

    /// Storage under `~/.open-agent/projects`.
    pub fn in_home(project_path: impl Into<String>) -> Self {
        let base = shellexpand::tilde(DEFAULT_BASE_DIR).into_owned();
        Self::new(base, project_path)
    }

    pub fn project_dir(&self) -> &Path {
        &self.dir
    }

    pub fn log_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.{LOG_EXTENSION}"))
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE_NAME)
    }

    async fn ensure_dir(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StorageError::io(&self.dir, source))
    }

    async fn read_index(&self) -> Option<ProjectIndex> {
        let path = self.index_path();
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %err, "Session index unreadable");
                }
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(index) => Some(index),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Session index is malformed");
                None
            }
        }
    }

    async fn write_index(&self, index: &ProjectIndex) -> Result<(), StorageError> {
        let content = serde_json::to_string_pretty(index)?;
        write_atomic(&self.index_path(), content.as_bytes()).await
    }

    async fn scan_directory<M: LogEntry>(&self) -> Result<Vec<SessionSummary>, StorageError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StorageError::io(&self.dir, err)),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| StorageError::io(&self.dir, source))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(LOG_EXTENSION) {
                continue;
            }
            match read_log::<M>(&path).await {
                Ok(Some(record)) => summaries.push(record.summary()),
                Ok(None) => {}
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Skipping unreadable session log");
                }
            }
        }
        Ok(summaries)
    }
}

#[async_trait]
impl<M: LogEntry> SessionStorage<M> for FileStorage {
    async fn save(&self, record: &SessionRecord<M>) -> Result<(), StorageError> {
        validate_session_id(record.id())?;
        self.ensure_dir().await?;

        let mut content = serde_json::to_string(&record.header)?;
        content.push('\n');
        for message in &record.messages {
            content.push_str(&serde_json::to_string(message)?);
            content.push('\n');
        }
        let path = self.log_path(record.id());
        write_atomic(&path, content.as_bytes()).await?;

        let mut index = self
            .read_index()
            .await
            .unwrap_or_else(|| ProjectIndex::new(self.project_path.clone()));
        index.upsert(record.summary());
        self.write_index(&index).await?;

        debug!(
            session_id = record.id(),
            messages = record.messages.len(),
            path = %path.display(),
            "Session log saved"
        );
        Ok(())
    }

    async fn append(&self, session_id: &str, message: &M) -> Result<(), StorageError> {
        validate_session_id(session_id)?;
        let path = self.log_path(session_id);
        if !fs::try_exists(&path)
            .await
            .map_err(|source| StorageError::io(&path, source))?
        {
            debug!(session_id, "Append skipped, session log was never saved");
            return Ok(());
        }

        let mut line = serde_json::to_string(message)?;
        line.push('\n');

        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .await
            .map_err(|source| StorageError::io(&path, source))?;
        let end = drop_torn_tail(&mut file, &path).await?;
        file.seek(SeekFrom::Start(end))
            .await
            .map_err(|source| StorageError::io(&path, source))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|source| StorageError::io(&path, source))?;
        file.sync_data()
            .await
            .map_err(|source| StorageError::io(&path, source))?;
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionRecord<M>>, StorageError> {
        validate_session_id(session_id)?;
        read_log(&self.log_path(session_id)).await
    }

    async fn delete(&self, session_id: &str) -> Result<bool, StorageError> {
        validate_session_id(session_id)?;
        let path = self.log_path(session_id);
        let removed = match fs::remove_file(&path).await {
            Ok(()) => true,
            Err(err) if err.kind() == io::ErrorKind::NotFound => false,
            Err(err) => return Err(StorageError::io(&path, err)),
        };

        if let Some(mut index) = self.read_index().await
            && index.remove(session_id)
        {
            self.write_index(&index).await?;
        }

        debug!(session_id, removed, "Session log deleted");
        Ok(removed)
    }

    async fn list(&self) -> Result<Vec<SessionSummary>, StorageError> {
        let mut summaries = match self.read_index().await {
            Some(index) => index.sessions,
            None => {
                debug!(dir = %self.dir.display(), "Session index missing, scanning directory");
                self.scan_directory::<M>().await?
            }
        };
        sort_recent_first(&mut summaries);
        Ok(summaries)
    }
}

/// Turn a project path into a single directory name.
pub fn encode_project_path(project_path: &str) -> String {
    project_path
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

async fn write_atomic(path: &Path, content: &[u8]) -> Result<(), StorageError> {
    let tmp = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp)
        .await
        .map_err(|source| StorageError::io(&tmp, source))?;
    file.write_all(content)
        .await
        .map_err(|source| StorageError::io(&tmp, source))?;
    file.sync_all()
        .await
        .map_err(|source| StorageError::io(&tmp, source))?;
    drop(file);
    fs::rename(&tmp, path)
        .await
        .map_err(|source| StorageError::io(path, source))
}

/// Cut a partial last line left by an interrupted write.
///
/// Returns the length of the log after the cut.
async fn drop_torn_tail(file: &mut fs::File, path: &Path) -> Result<u64, StorageError> {
    let io_err = |source: io::Error| StorageError::io(path, source);
    let len = file.metadata().await.map_err(io_err)?.len();
    if len == 0 {
        return Ok(0);
    }
    file.seek(SeekFrom::End(-1)).await.map_err(io_err)?;
    if file.read_u8().await.map_err(io_err)? == b'\n' {
        return Ok(len);
    }

    file.seek(SeekFrom::Start(0)).await.map_err(io_err)?;
    let mut content = Vec::with_capacity(len as usize);
    file.read_to_end(&mut content).await.map_err(io_err)?;
    let Some(last_newline) = content.iter().rposition(|byte| *byte == b'\n') else {
        return Err(StorageError::CorruptHeader {
            path: path.to_path_buf(),
            reason: "log has no complete line".into(),
        });
    };
    let kept = last_newline as u64 + 1;
    file.set_len(kept).await.map_err(io_err)?;
    warn!(
        path = %path.display(),
        dropped_bytes = len - kept,
        "Dropped partial trailing session log entry"
    );
    Ok(kept)
}

async fn read_log<M: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<Option<SessionRecord<M>>, StorageError> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(StorageError::io(path, err)),
    };

    let mut lines = content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty());
    let header: SessionHeader = match lines.next() {
        Some((_, line)) => {
            serde_json::from_str(line).map_err(|err| StorageError::CorruptHeader {
                path: path.to_path_buf(),
                reason: err.to_string(),
            })?
        }
        None => {
            return Err(StorageError::CorruptHeader {
                path: path.to_path_buf(),
                reason: "log is empty".into(),
            });
        }
    };

    // Only the final line may be torn by a crash; anything earlier is corruption.
    let mut messages = Vec::new();
    let mut lines = lines.peekable();
    while let Some((line_num, line)) = lines.next() {
        match serde_json::from_str(line) {
            Ok(message) => messages.push(message),
            Err(err) if lines.peek().is_none() => {
                warn!(
                    path = %path.display(),
                    line = line_num + 1,
                    error = %err,
                    "Skipping torn final session log entry"
                );
            }
            Err(err) => {
                return Err(StorageError::CorruptEntry {
                    path: path.to_path_buf(),
                    line: line_num + 1,
                    reason: err.to_string(),
                });
            }
        }
    }

    Ok(Some(SessionRecord { header, messages }))
}
