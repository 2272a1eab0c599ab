use super::{SessionError, Shared};
use crate::agent::EventStream;
use crate::error::AgentError;
use crate::types::{Message, ResultMessage};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Messages of one session turn.
///
/// Dropping the stream before it ends cancels the turn and returns the
/// session to `idle`.
pub struct SessionStream {
    inner: BoxStream<'static, Result<Message, SessionError>>,
}

impl SessionStream {
    pub(super) fn new(shared: Arc<Shared>, events: EventStream) -> Self {
        let drain = Drain {
            shared,
            events,
            finished: false,
            completed: false,
        };
        let inner = stream::unfold(drain, |mut drain| async move {
            let item = drain.next().await?;
            Some((item, drain))
        })
        .boxed();
        Self { inner }
    }

    /// Drain the turn, stopping at the first error.
    pub async fn collect_messages(mut self) -> Result<Vec<Message>, SessionError> {
        let mut messages = Vec::new();
        while let Some(item) = self.inner.next().await {
            messages.push(item?);
        }
        Ok(messages)
    }

    /// Drain the turn and return its `ResultMessage`.
    pub async fn result(self) -> Result<Option<ResultMessage>, SessionError> {
        let messages = self.collect_messages().await?;
        Ok(messages.into_iter().rev().find_map(|message| match message {
            Message::Result(result) => Some(result),
            _ => None,
        }))
    }
}

impl fmt::Debug for SessionStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStream").finish_non_exhaustive()
    }
}

impl Stream for SessionStream {
    type Item = Result<Message, SessionError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

struct Drain {
    shared: Arc<Shared>,
    events: EventStream,
    finished: bool,
    /// A `ResultMessage` arrived, so the channel may close.
    completed: bool,
}

impl Drain {
    async fn next(&mut self) -> Option<Result<Message, SessionError>> {
        if self.finished {
            return None;
        }
        match self.events.next().await {
            Some(Ok(message)) => {
                if message.is_transient() {
                    return Some(Ok(message));
                }
                self.completed = matches!(message, Message::Result(_));
                self.shared.lock().messages.push(message.clone());
                if let Err(err) = self.shared.persist(&message).await {
                    self.abort(&err);
                    return Some(Err(err));
                }
                Some(Ok(message))
            }
            Some(Err(err)) => {
                let err = SessionError::Agent(err);
                self.abort(&err);
                Some(Err(err))
            }
            None if self.completed => {
                self.finished = true;
                self.shared.end_turn(None);
                None
            }
            None => {
                let err = SessionError::Agent(AgentError::ChannelClosed);
                self.abort(&err);
                Some(Err(err))
            }
        }
    }

    fn abort(&mut self, err: &SessionError) {
        self.finished = true;
        if let Some(turn) = &self.shared.lock().turn {
            turn.cancel();
        }
        self.shared.end_turn(Some(err.to_string()));
    }
}

impl Drop for Drain {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(turn) = &self.shared.lock().turn {
            turn.cancel();
        }
        self.shared.end_turn(Some("stream dropped before completion".into()));
    }
}
