use super::{Core, Session, SessionError, SessionState, Shared};
use crate::agent::AgentLoop;
use crate::config::AgentOptions;
use crate::hooks::HookManager;
use crate::permissions::ApprovalHandler;
use crate::provider::Provider;
use crate::tooling::{Tool, ToolRegistry};
use crate::types::{Message, new_message_id};
use chrono::{DateTime, Utc};
use open_agent_session::{SessionRecord, SessionStorage};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Creates, resumes or forks a [`Session`].
pub struct SessionBuilder {
    provider: Arc<dyn Provider>,
    options: AgentOptions,
    tools: ToolRegistry,
    hooks: Option<Arc<HookManager>>,
    approval: Option<Arc<dyn ApprovalHandler>>,
    storage: Option<Arc<dyn SessionStorage<Message>>>,
    session_id: Option<String>,
}

struct Restored {
    id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    messages: Vec<Message>,
    parent_session_id: Option<String>,
    forked_at: Option<DateTime<Utc>>,
    persisted: bool,
}

impl SessionBuilder {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            options: AgentOptions::default(),
            tools: ToolRegistry::new(),
            hooks: None,
            approval: None,
            storage: None,
            session_id: None,
        }
    }

    /// Options for a new session. Resumed and forked sessions use the stored ones.
    pub fn options(mut self, options: AgentOptions) -> Self {
        self.options = options;
        self
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.register(Arc::new(tool));
        self
    }

    pub fn hooks(mut self, hooks: HookManager) -> Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    pub fn approval(mut self, handler: impl ApprovalHandler + 'static) -> Self {
        self.approval = Some(Arc::new(handler));
        self
    }

    pub fn storage(self, storage: impl SessionStorage<Message> + 'static) -> Self {
        self.shared_storage(Arc::new(storage))
    }

    pub fn shared_storage(mut self, storage: Arc<dyn SessionStorage<Message>>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    /// A fresh session. Nothing is written until the first `send`.
    pub fn build(mut self) -> Result<Session, SessionError> {
        let now = Utc::now();
        let id = self.session_id.take().unwrap_or_else(new_message_id);
        let options = self.options.clone();
        self.assemble(
            options,
            Restored {
                id,
                created_at: now,
                updated_at: now,
                messages: Vec::new(),
                parent_session_id: None,
                forked_at: None,
                persisted: false,
            },
            false,
        )
    }

    /// Rebuild a session from its log, with the options stored in its header.
    pub async fn resume(self, id: &str) -> Result<Session, SessionError> {
        let record = self.load(id).await?;
        let options = AgentOptions::from_value(&record.header.options)?;
        info!(
            session_id = id,
            messages = record.messages.len(),
            "Resuming session"
        );
        self.assemble(
            options,
            Restored {
                id: record.header.id,
                created_at: record.header.created_at,
                updated_at: record.header.updated_at,
                messages: record.messages,
                parent_session_id: record.header.parent_session_id,
                forked_at: record.header.forked_at,
                persisted: true,
            },
            true,
        )
    }

    /// Copy a stored history into a new session and save it immediately.
    pub async fn fork(mut self, id: &str) -> Result<Session, SessionError> {
        let record = self.load(id).await?;
        let options = AgentOptions::from_value(&record.header.options)?;
        let fork_id = self.session_id.take().unwrap_or_else(new_message_id);
        let now = Utc::now();
        let messages = record
            .messages
            .into_iter()
            .map(|mut message| {
                message.set_session_id(&fork_id);
                message
            })
            .collect();

        let session = self.assemble(
            options,
            Restored {
                id: fork_id,
                created_at: now,
                updated_at: now,
                messages,
                parent_session_id: Some(id.to_string()),
                forked_at: Some(now),
                persisted: false,
            },
            true,
        )?;

        if let Some(storage) = &session.shared.storage {
            storage.save(&session.record()).await?;
            session.shared.lock().persisted = true;
        }
        info!(session_id = session.id(), parent = id, "Session forked");
        Ok(session)
    }

    async fn load(&self, id: &str) -> Result<SessionRecord<Message>, SessionError> {
        let storage = self.storage.as_ref().ok_or(SessionError::NoStorage)?;
        storage
            .load(id)
            .await?
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })
    }

    fn assemble(
        self,
        options: AgentOptions,
        restored: Restored,
        resumed: bool,
    ) -> Result<Session, SessionError> {
        let mut agent = AgentLoop::builder(self.provider)
            .options(options.clone())
            .tools(self.tools)
            .session_id(restored.id.clone())
            .resumed(resumed);
        if let Some(hooks) = self.hooks {
            agent = agent.shared_hooks(hooks);
        }
        if let Some(handler) = self.approval {
            agent = agent.approval_arc(handler);
        }
        let agent = agent.build()?;

        Ok(Session::from_shared(Shared {
            id: restored.id,
            created_at: restored.created_at,
            options,
            agent,
            storage: self.storage,
            cancel: CancellationToken::new(),
            core: Mutex::new(Core {
                state: SessionState::Idle,
                messages: restored.messages,
                streaming: false,
                updated_at: restored.updated_at,
                persisted: restored.persisted,
                turn: None,
                last_error: None,
                parent_session_id: restored.parent_session_id,
                forked_at: restored.forked_at,
            }),
        }))
    }
}
