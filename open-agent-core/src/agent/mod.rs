//! # Agent loop
//!
//! Turns one user instruction into a bounded sequence of assistant turns,
//! tool calls and tool results, ending in a [`ResultMessage`].
//!
//! A run executes on a spawned task and reports through a bounded channel.
//! Every suspension point (provider stream, hook callback, permission check,
//! tool call) races the run's [`CancellationToken`]; cancellation surfaces as
//! [`AgentError::Cancelled`] after `SessionEnd(interrupted)` is emitted.
//!
//! [`ResultMessage`]: crate::types::ResultMessage

mod builder;
mod runner;

pub use builder::AgentLoopBuilder;

use crate::checkpoint::FileCheckpointer;
use crate::config::AgentOptions;
use crate::error::AgentError;
use crate::hooks::HookManager;
use crate::permissions::PermissionManager;
use crate::provider::Provider;
use crate::tooling::ToolRegistry;
use crate::types::Message;
use futures::StreamExt;
use jsonschema::Validator;
use runner::Run;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const EVENT_BUFFER: usize = 64;

/// Messages produced by one run, ending with either a `ResultMessage` or an error.
pub type EventStream = ReceiverStream<Result<Message, AgentError>>;

/// The ReAct engine. Cheap to clone; clones share configuration and state.
#[derive(Clone)]
pub struct AgentLoop {
    inner: Arc<LoopInner>,
}

pub(crate) struct LoopInner {
    pub(crate) session_id: String,
    pub(crate) options: AgentOptions,
    pub(crate) provider: Arc<dyn Provider>,
    pub(crate) tools: ToolRegistry,
    pub(crate) permissions: Arc<PermissionManager>,
    pub(crate) hooks: Arc<HookManager>,
    pub(crate) output_validator: Option<Validator>,
    pub(crate) checkpoints: Option<FileCheckpointer>,
    /// Runs as a subagent: no session lifecycle hooks, no init message.
    pub(crate) nested: bool,
    pub(crate) resumed: bool,
    pub(crate) started: AtomicBool,
}

impl AgentLoop {
    pub fn builder(provider: Arc<dyn Provider>) -> AgentLoopBuilder {
        AgentLoopBuilder::new(provider)
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn options(&self) -> &AgentOptions {
        &self.inner.options
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.inner.tools
    }

    pub fn permissions(&self) -> &Arc<PermissionManager> {
        &self.inner.permissions
    }

    pub fn hooks(&self) -> &Arc<HookManager> {
        &self.inner.hooks
    }

    pub fn provider_name(&self) -> &str {
        self.inner.provider.name()
    }

    /// The configured model override, or the provider's model.
    pub fn model(&self) -> &str {
        self.inner.model()
    }

    /// Start a run. `history` is the conversation before `prompt`.
    pub fn run_stream(
        &self,
        prompt: impl Into<String>,
        history: Vec<Message>,
        cancel: CancellationToken,
    ) -> EventStream {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let run = Run::new(self.inner.clone(), tx, cancel);
        let prompt = prompt.into();
        debug!(
            session_id = self.inner.session_id.as_str(),
            history = history.len(),
            "Agent run spawned"
        );
        tokio::spawn(run.execute(prompt, history));
        ReceiverStream::new(rx)
    }

    /// Run to completion and collect every message.
    ///
    /// A run that stops without a `ResultMessage` fails with
    /// [`AgentError::ChannelClosed`].
    pub async fn run(
        &self,
        prompt: impl Into<String>,
        history: Vec<Message>,
        cancel: CancellationToken,
    ) -> Result<Vec<Message>, AgentError> {
        let mut stream = self.run_stream(prompt, history, cancel);
        let mut messages = Vec::new();
        while let Some(item) = stream.next().await {
            messages.push(item?);
        }
        match messages.last() {
            Some(Message::Result(_)) => Ok(messages),
            _ => Err(AgentError::ChannelClosed),
        }
    }

    /// Restore every file touched by edit tools since checkpointing began.
    pub async fn rewind_files(&self) -> Result<usize, AgentError> {
        match &self.inner.checkpoints {
            Some(checkpoints) => Ok(checkpoints.rewind().await?),
            None => Ok(0),
        }
    }

    /// Cancel the signals handed to approval handlers and hook callbacks.
    pub fn destroy(&self) {
        self.inner.permissions.destroy();
        self.inner.hooks.destroy();
    }
}

impl LoopInner {
    pub(crate) fn model(&self) -> &str {
        self.options
            .model
            .as_deref()
            .unwrap_or_else(|| self.provider.model())
    }
}

impl fmt::Debug for AgentLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentLoop")
            .field("session_id", &self.inner.session_id)
            .field("provider", &self.inner.provider.name())
            .field("model", &self.inner.model())
            .field("tools", &self.inner.tools)
            .field("max_turns", &self.inner.options.max_turns)
            .field("nested", &self.inner.nested)
            .finish()
    }
}
