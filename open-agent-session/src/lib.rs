//! # open-agent-session
//!
//! Durable, append-only session logs.
//!
//! A session log is one JSONL file per session: the first line is a
//! [`SessionHeader`], every following line is exactly one serialized message
//! in production order. Each project directory also keeps a small JSON index
//! used by [`SessionStorage::list`].
//!
//! The crate is generic over the persisted message type so it does not depend
//! on the agent runtime; anything implementing [`LogEntry`] can be stored.
//!
//! ## Backends
//!
//! - [`FileStorage`] - JSONL files under `<base>/<encoded project path>/`
//! - [`MemoryStorage`] - process-local, used by tests and ephemeral sessions

mod error;
mod file;
mod memory;
mod record;
mod storage;

pub use error::StorageError;
pub use file::{FileStorage, INDEX_FILE_NAME, encode_project_path};
pub use memory::MemoryStorage;
pub use record::{LogEntry, ProjectIndex, SessionHeader, SessionRecord, SessionSummary};
pub use storage::SessionStorage;
