//! # Sessions
//!
//! A [`Session`] wraps one [`AgentLoop`] across many user turns and owns the
//! authoritative history. Each turn is `send(text)` followed by draining
//! `stream()`:
//!
//! ```text
//! idle --send--> ready --stream--> running --done--> idle
//!                                  running --error--> error --> idle
//! any --close--> closed
//! ```
//!
//! Every non-transient message produced by the loop is appended to history,
//! then to the session log, then yielded to the caller.

mod builder;
mod stream;

pub use builder::SessionBuilder;
pub use stream::SessionStream;

use crate::agent::AgentLoop;
use crate::config::{AgentOptions, ConfigError};
use crate::error::AgentError;
use crate::types::Message;
use chrono::{DateTime, Utc};
use open_agent_session::{SessionHeader, SessionRecord, SessionStorage, StorageError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Ready,
    Running,
    Error,
    Closed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Ready => "ready",
            SessionState::Running => "running",
            SessionState::Error => "error",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is closed")]
    Closed,
    #[error("session is not idle (state: {state})")]
    NotIdle { state: SessionState },
    #[error("session is not ready (state: {state})")]
    NotReady { state: SessionState },
    #[error("session is already streaming")]
    AlreadyStreaming,
    #[error("session '{id}' not found")]
    NotFound { id: String },
    #[error("session storage is not configured")]
    NoStorage,
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SessionError {
    /// The turn ended because the caller cancelled it.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SessionError::Agent(err) if err.is_cancelled())
    }

    /// Called out of turn, or on a closed session.
    pub fn is_state_violation(&self) -> bool {
        matches!(
            self,
            SessionError::Closed
                | SessionError::NotIdle { .. }
                | SessionError::NotReady { .. }
                | SessionError::AlreadyStreaming
        )
    }
}

/// A multi-turn conversation. Clones share the same session.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    pub(crate) id: String,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) options: AgentOptions,
    pub(crate) agent: AgentLoop,
    pub(crate) storage: Option<Arc<dyn SessionStorage<Message>>>,
    pub(crate) cancel: CancellationToken,
    pub(crate) core: Mutex<Core>,
}

pub(crate) struct Core {
    pub(crate) state: SessionState,
    pub(crate) messages: Vec<Message>,
    pub(crate) streaming: bool,
    pub(crate) updated_at: DateTime<Utc>,
    /// Whether the log exists, so later writes append instead of saving.
    pub(crate) persisted: bool,
    pub(crate) turn: Option<CancellationToken>,
    pub(crate) last_error: Option<String>,
    pub(crate) parent_session_id: Option<String>,
    pub(crate) forked_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn builder(provider: Arc<dyn crate::provider::Provider>) -> SessionBuilder {
        SessionBuilder::new(provider)
    }

    pub(crate) fn from_shared(shared: Shared) -> Self {
        Self {
            shared: Arc::new(shared),
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn model(&self) -> &str {
        self.shared.agent.model()
    }

    pub fn provider(&self) -> &str {
        self.shared.agent.provider_name()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.shared.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.shared.lock().updated_at
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Snapshot of the history.
    pub fn messages(&self) -> Vec<Message> {
        self.shared.lock().messages.clone()
    }

    pub fn options(&self) -> &AgentOptions {
        &self.shared.options
    }

    pub fn agent(&self) -> &AgentLoop {
        &self.shared.agent
    }

    pub fn parent_session_id(&self) -> Option<String> {
        self.shared.lock().parent_session_id.clone()
    }

    /// Message of the most recent failed turn.
    pub fn last_error(&self) -> Option<String> {
        self.shared.lock().last_error.clone()
    }

    /// Queue the next user turn.
    pub async fn send(&self, text: impl Into<String>) -> Result<(), SessionError> {
        let message = Message::user(self.shared.id.clone(), text);
        {
            let mut core = self.shared.lock();
            match core.state {
                SessionState::Idle => {}
                SessionState::Closed => return Err(SessionError::Closed),
                state => return Err(SessionError::NotIdle { state }),
            }
            core.messages.push(message.clone());
            core.updated_at = Utc::now();
            core.state = SessionState::Ready;
        }
        debug!(session_id = self.shared.id.as_str(), "User turn queued");

        if let Err(err) = self.shared.persist(&message).await {
            let mut core = self.shared.lock();
            core.messages.pop();
            if core.state == SessionState::Ready {
                core.state = SessionState::Idle;
            }
            return Err(err);
        }
        Ok(())
    }

    /// Run the queued turn. The stream is lazy, finite and not restartable.
    pub fn stream(&self) -> Result<SessionStream, SessionError> {
        let (prompt, history, turn) = {
            let mut core = self.shared.lock();
            if core.state == SessionState::Closed {
                return Err(SessionError::Closed);
            }
            if core.streaming {
                return Err(SessionError::AlreadyStreaming);
            }
            if core.state != SessionState::Ready {
                return Err(SessionError::NotReady { state: core.state });
            }
            let Some((Message::User(prompt), history)) = core.messages.split_last() else {
                return Err(SessionError::NotReady { state: core.state });
            };
            let prompt = prompt.text.clone();
            let history = history.to_vec();

            let turn = self.shared.cancel.child_token();
            core.turn = Some(turn.clone());
            core.streaming = true;
            core.state = SessionState::Running;
            (prompt, history, turn)
        };
        info!(
            session_id = self.shared.id.as_str(),
            history = history.len(),
            "Session turn started"
        );

        let events = self.shared.agent.run_stream(prompt, history, turn);
        Ok(SessionStream::new(self.shared.clone(), events))
    }

    /// Cancel the turn in flight. Returns whether there was one.
    pub fn interrupt(&self) -> bool {
        let core = self.shared.lock();
        match &core.turn {
            Some(turn) => {
                info!(session_id = self.shared.id.as_str(), "Session turn interrupted");
                turn.cancel();
                true
            }
            None => false,
        }
    }

    /// Terminal. Cancels any turn in flight.
    pub fn close(&self) {
        {
            let mut core = self.shared.lock();
            if core.state == SessionState::Closed {
                return;
            }
            core.state = SessionState::Closed;
            core.updated_at = Utc::now();
        }
        self.shared.cancel.cancel();
        self.shared.agent.destroy();
        info!(session_id = self.shared.id.as_str(), "Session closed");
    }

    /// Current persisted form of the session.
    pub fn record(&self) -> SessionRecord<Message> {
        let core = self.shared.lock();
        self.shared.record(&core)
    }
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub(crate) fn record(&self, core: &Core) -> SessionRecord<Message> {
        let mut header = SessionHeader::new(
            self.id.clone(),
            self.agent.model(),
            self.agent.provider_name(),
        )
        .with_options(self.options.to_value());
        header.created_at = self.created_at;
        header.updated_at = core.updated_at;
        if let (Some(parent), Some(at)) = (&core.parent_session_id, core.forked_at) {
            header = header.forked_from(parent.clone(), at);
        }
        SessionRecord::new(header, core.messages.clone())
    }

    /// Write a message that is already in history to the log.
    ///
    /// The first write saves the whole record; later writes append.
    pub(crate) async fn persist(&self, message: &Message) -> Result<(), SessionError> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        let record = {
            let core = self.lock();
            (!core.persisted).then(|| self.record(&core))
        };
        match record {
            Some(record) => {
                storage.save(&record).await?;
                self.lock().persisted = true;
                debug!(
                    session_id = self.id.as_str(),
                    messages = record.messages.len(),
                    "Session log created"
                );
            }
            None => storage.append(&self.id, message).await?,
        }
        Ok(())
    }

    /// Leave `running`, either cleanly or through `error`.
    pub(crate) fn end_turn(&self, error: Option<String>) {
        let mut core = self.lock();
        core.streaming = false;
        core.turn = None;
        core.updated_at = Utc::now();
        if core.state == SessionState::Closed {
            return;
        }
        match error {
            Some(error) => {
                core.state = SessionState::Error;
                info!(
                    session_id = self.id.as_str(),
                    error = error.as_str(),
                    "Session turn failed"
                );
                core.last_error = Some(error);
                core.state = SessionState::Idle;
            }
            None => {
                core.last_error = None;
                core.state = SessionState::Idle;
                debug!(session_id = self.id.as_str(), "Session turn finished");
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.shared.lock();
        f.debug_struct("Session")
            .field("id", &self.shared.id)
            .field("state", &core.state)
            .field("messages", &core.messages.len())
            .field("persisted", &core.persisted)
            .finish()
    }
}
