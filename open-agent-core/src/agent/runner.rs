use super::LoopInner;
use crate::error::{AgentError, panic_message};
use crate::hooks::{HookInput, HookOutput, HookPayload};
use crate::permissions::{PermissionDecision, PermissionMode, is_edit_tool};
use crate::provider::{ChatRequest, ProviderError, StreamChunk};
use crate::tooling::{ToolContext, ToolError};
use crate::types::{
    AssistantMessage, Message, ResultMessage, ResultOutcome, StopReason, StreamEvent,
    SystemMessage, ToolCall, ToolDefinition, ToolResultMessage, Usage, new_message_id,
};
use chrono::Utc;
use futures::{FutureExt, StreamExt};
use serde_json::Value;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type Events = mpsc::Sender<Result<Message, AgentError>>;

enum TurnOutcome {
    Completed {
        assistant: AssistantMessage,
        structured: Option<Value>,
    },
    /// The provider reported an error. Partial text, if any, is kept.
    Failed {
        partial: Option<AssistantMessage>,
        error: String,
    },
}

/// State of a single `run_stream` call.
pub(super) struct Run {
    inner: Arc<LoopInner>,
    events: Events,
    cancel: CancellationToken,
    started_at: Instant,
    usage: Usage,
    turns: u32,
}

impl Run {
    pub(super) fn new(inner: Arc<LoopInner>, events: Events, cancel: CancellationToken) -> Self {
        Self {
            inner,
            events,
            cancel,
            started_at: Instant::now(),
            usage: Usage::default(),
            turns: 0,
        }
    }

    pub(super) async fn execute(mut self, prompt: String, history: Vec<Message>) {
        let outcome = match self.drive(prompt, history).await {
            Err(AgentError::Cancelled) => {
                info!(
                    session_id = self.inner.session_id.as_str(),
                    turn = self.turns,
                    "Agent run interrupted"
                );
                self.end_interrupted().await;
                Err(AgentError::Cancelled)
            }
            other => other,
        };
        if let Err(err) = outcome {
            let _ = self.events.send(Err(err)).await;
        }
    }

    async fn drive(&mut self, prompt: String, history: Vec<Message>) -> Result<(), AgentError> {
        self.check_cancelled()?;

        let first_run = !self.inner.started.swap(true, Ordering::SeqCst);
        if first_run && !self.inner.nested {
            let source = if self.inner.resumed || !history.is_empty() {
                "resume"
            } else {
                "startup"
            };
            self.emit(HookPayload::SessionStart {
                source: source.to_string(),
            })
            .await?;
            let init = self.init_message();
            self.send(init).await?;
        }
        if !self.inner.nested {
            self.emit(HookPayload::UserPromptSubmit {
                prompt: prompt.clone(),
            })
            .await?;
        }

        let mut conversation = replayable_history(history);
        conversation.push(Message::user(self.inner.session_id.clone(), prompt));
        let definitions = self.inner.tools.definitions();
        let max_turns = self.inner.options.max_turns;

        while self.turns < max_turns {
            self.turns += 1;
            debug!(
                session_id = self.inner.session_id.as_str(),
                turn = self.turns,
                max_turns,
                "Requesting assistant turn"
            );

            let outcome = self.request_turn(&conversation, &definitions).await?;
            let (assistant, structured) = match outcome {
                TurnOutcome::Completed {
                    assistant,
                    structured,
                } => (assistant, structured),
                TurnOutcome::Failed { partial, error } => {
                    warn!(
                        session_id = self.inner.session_id.as_str(),
                        turn = self.turns,
                        error = error.as_str(),
                        "Provider reported an error"
                    );
                    if let Some(partial) = partial {
                        self.send(Message::Assistant(partial)).await?;
                    }
                    return self.fail(vec![error]).await;
                }
            };

            self.send(Message::Assistant(assistant.clone())).await?;
            if !assistant.has_tool_calls() {
                return self.finish(&assistant, structured).await;
            }
            conversation.push(Message::Assistant(assistant.clone()));

            // Sequential: later calls may depend on files written by earlier ones.
            for (index, call) in assistant.tool_calls.iter().enumerate() {
                let result = match self.run_tool(call).await {
                    Err(AgentError::Cancelled) => {
                        self.close_pending(&assistant.tool_calls[index..]).await;
                        return Err(AgentError::Cancelled);
                    }
                    other => other?,
                };
                let message = Message::ToolResult(result);
                self.send(message.clone()).await?;
                conversation.push(message);
            }
        }

        warn!(
            session_id = self.inner.session_id.as_str(),
            max_turns, "Agent exhausted its turn budget"
        );
        if !self.inner.nested {
            self.emit(HookPayload::SessionEnd {
                reason: "max_turns".into(),
            })
            .await?;
        }
        self.send_result(
            ResultOutcome::ErrorMaxTurns,
            None,
            None,
            vec![format!("reached maximum number of turns ({max_turns})")],
        )
        .await
    }

    async fn request_turn(
        &mut self,
        conversation: &[Message],
        definitions: &[ToolDefinition],
    ) -> Result<TurnOutcome, AgentError> {
        let options = &self.inner.options;
        let request = ChatRequest {
            messages: conversation.to_vec(),
            tools: definitions.to_vec(),
            system_instruction: options.system_prompt.clone(),
            model: options.model.clone(),
            output_schema: options.output_schema().cloned(),
        };

        let provider = self.inner.provider.clone();
        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(AgentError::Cancelled),
            opened = provider.chat(request, self.cancel.child_token()) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(ProviderError::Cancelled) => return Err(AgentError::Cancelled),
            Err(err) => {
                return Ok(TurnOutcome::Failed {
                    partial: None,
                    error: err.to_string(),
                });
            }
        };

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        let mut usage: Option<Usage> = None;
        let mut stop_reason = None;
        let mut structured = None;
        let mut error = None;

        loop {
            let chunk = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(AgentError::Cancelled),
                chunk = stream.next() => chunk,
            };
            match chunk {
                None => break,
                Some(StreamChunk::ContentDelta(delta)) => {
                    if self.inner.options.include_partial_messages {
                        self.send(Message::StreamEvent(StreamEvent {
                            session_id: self.inner.session_id.clone(),
                            delta: delta.clone(),
                        }))
                        .await?;
                    }
                    text.push_str(&delta);
                }
                Some(StreamChunk::ToolCall(call)) => tool_calls.push(call),
                Some(StreamChunk::Usage(reported)) => {
                    *usage.get_or_insert_with(Usage::default) += reported;
                }
                Some(StreamChunk::StructuredOutput(value)) => structured = Some(value),
                Some(StreamChunk::Error(message)) => error = Some(message),
                Some(StreamChunk::Done { stop_reason: reason }) => {
                    stop_reason = reason;
                    break;
                }
            }
        }
        if let Some(reported) = usage {
            self.usage += reported;
        }

        let text_parts = if text.is_empty() { Vec::new() } else { vec![text] };
        if let Some(error) = error {
            // Tool calls from a failed turn are dropped: they would never get results.
            let partial = (!text_parts.is_empty()).then(|| AssistantMessage {
                id: new_message_id(),
                session_id: self.inner.session_id.clone(),
                text_parts,
                tool_calls: Vec::new(),
                model: Some(self.inner.model().to_string()),
                usage,
                stop_reason: Some(StopReason::Error),
                timestamp: Utc::now(),
            });
            return Ok(TurnOutcome::Failed { partial, error });
        }

        let stop_reason = stop_reason.or(Some(if tool_calls.is_empty() {
            StopReason::EndTurn
        } else {
            StopReason::ToolUse
        }));
        Ok(TurnOutcome::Completed {
            assistant: AssistantMessage {
                id: new_message_id(),
                session_id: self.inner.session_id.clone(),
                text_parts,
                tool_calls,
                model: Some(self.inner.model().to_string()),
                usage,
                stop_reason,
                timestamp: Utc::now(),
            },
            structured,
        })
    }

    async fn run_tool(&mut self, call: &ToolCall) -> Result<ToolResultMessage, AgentError> {
        let tool_name = call.name.as_str();
        let mut input = match call.input() {
            Ok(input) => input,
            Err(err) => {
                let reason = format!("Invalid JSON arguments for {tool_name}: {err}");
                return Ok(self.error_result(call, reason));
            }
        };

        let pre = self
            .emit_for_tool(
                HookPayload::PreToolUse {
                    tool_name: tool_name.to_string(),
                    tool_input: input.clone(),
                },
                call,
            )
            .await?;
        for output in pre {
            if output.is_block() {
                let reason = output
                    .reason
                    .unwrap_or_else(|| format!("{tool_name} blocked by hook"));
                info!(tool = tool_name, reason = reason.as_str(), "Tool call blocked by hook");
                self.report_failure(call, &input, &reason).await?;
                return Ok(self.error_result(call, reason));
            }
            if let Some(updated) = output.updated_input {
                input = updated;
            }
        }

        let permissions = self.inner.permissions.clone();
        let Some(tool) = self.inner.tools.get(tool_name) else {
            if permissions.mode() == PermissionMode::Plan {
                // Plan mode audits every requested call, known or not.
                permissions.check(tool_name, input.clone()).await;
            }
            let reason = ToolError::NotFound(tool_name.to_string()).to_string();
            warn!(tool = tool_name, "Model requested an unknown tool");
            self.report_failure(call, &input, &reason).await?;
            return Ok(self.error_result(call, reason));
        };

        let decision = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(AgentError::Cancelled),
            decision = permissions.check(tool_name, input.clone()) => decision,
        };
        let input = match decision {
            PermissionDecision::Allow { updated_input } => updated_input,
            PermissionDecision::Deny { reason } => {
                info!(
                    tool = tool_name,
                    mode = %permissions.mode(),
                    reason = reason.as_str(),
                    "Tool call denied"
                );
                self.emit_for_tool(
                    HookPayload::PermissionRequest {
                        tool_name: tool_name.to_string(),
                        tool_input: input.clone(),
                        reason: Some(reason.clone()),
                    },
                    call,
                )
                .await?;
                if permissions.mode() != PermissionMode::Plan {
                    self.report_failure(call, &input, &reason).await?;
                }
                return Ok(self.error_result(call, reason));
            }
        };

        if let Some(checkpoints) = &self.inner.checkpoints
            && is_edit_tool(tool_name)
        {
            checkpoints.capture(&self.inner.options.cwd, &input).await;
        }

        let context = ToolContext {
            session_id: self.inner.session_id.clone(),
            tool_call_id: call.id.clone(),
            cwd: self.inner.options.cwd.clone(),
            env: self.inner.options.env.clone(),
            cancel: self.cancel.child_token(),
        };
        debug!(tool = tool_name, call_id = call.id.as_str(), "Executing tool");
        let executed = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(AgentError::Cancelled),
            caught = AssertUnwindSafe(tool.execute(input.clone(), context)).catch_unwind() => {
                caught.unwrap_or_else(|panic| {
                    Err(ToolError::execution(format!(
                        "tool panicked: {}",
                        panic_message(&*panic)
                    )))
                })
            }
        };

        match executed {
            Ok(output) => {
                self.emit_for_tool(
                    HookPayload::PostToolUse {
                        tool_name: tool_name.to_string(),
                        tool_input: input,
                        tool_response: output.clone(),
                    },
                    call,
                )
                .await?;
                Ok(self.tool_result(call, output, false))
            }
            Err(ToolError::Cancelled(_)) if self.cancel.is_cancelled() => {
                Err(AgentError::Cancelled)
            }
            Err(err) => {
                let reason = err.to_string();
                warn!(tool = tool_name, error = reason.as_str(), "Tool execution failed");
                self.report_failure(call, &input, &reason).await?;
                Ok(self.error_result(call, reason))
            }
        }
    }

    async fn finish(
        &mut self,
        assistant: &AssistantMessage,
        structured: Option<Value>,
    ) -> Result<(), AgentError> {
        let text = assistant.text();
        let mut structured_output = None;

        if let Some(validator) = &self.inner.output_validator {
            let Some(candidate) = structured.or_else(|| parse_json_answer(&text)) else {
                return self
                    .fail(vec!["final answer is not valid JSON".to_string()])
                    .await;
            };
            let errors: Vec<String> = validator
                .iter_errors(&candidate)
                .map(|err| err.to_string())
                .collect();
            if !errors.is_empty() {
                warn!(
                    session_id = self.inner.session_id.as_str(),
                    errors = errors.len(),
                    "Final answer failed schema validation"
                );
                return self.fail(errors).await;
            }
            structured_output = Some(candidate);
        }

        if !self.inner.nested {
            self.emit(HookPayload::Stop {
                result: text.clone(),
            })
            .await?;
            self.emit(HookPayload::SessionEnd {
                reason: "completed".into(),
            })
            .await?;
        }
        info!(
            session_id = self.inner.session_id.as_str(),
            turns = self.turns,
            input_tokens = self.usage.input_tokens,
            output_tokens = self.usage.output_tokens,
            "Agent run completed"
        );
        self.send_result(ResultOutcome::Success, Some(text), structured_output, Vec::new())
            .await
    }

    async fn fail(&mut self, errors: Vec<String>) -> Result<(), AgentError> {
        if !self.inner.nested {
            self.emit(HookPayload::SessionEnd {
                reason: "error".into(),
            })
            .await?;
        }
        self.send_result(ResultOutcome::ErrorDuringExecution, None, None, errors)
            .await
    }

    async fn report_failure(
        &self,
        call: &ToolCall,
        input: &Value,
        reason: &str,
    ) -> Result<(), AgentError> {
        self.emit_for_tool(
            HookPayload::PostToolUseFailure {
                tool_name: call.name.clone(),
                tool_input: input.clone(),
                error: reason.to_string(),
            },
            call,
        )
        .await
        .map(drop)
    }

    /// Answer calls cut off by cancellation so the history stays replayable.
    async fn close_pending(&self, calls: &[ToolCall]) {
        for call in calls {
            let result = self.error_result(call, "interrupted".to_string());
            if self.send(Message::ToolResult(result)).await.is_err() {
                break;
            }
        }
    }

    async fn end_interrupted(&self) {
        if self.inner.nested {
            return;
        }
        let input = self.hook_input(HookPayload::SessionEnd {
            reason: "interrupted".into(),
        });
        self.inner.hooks.emit(&input, None).await;
    }

    async fn emit(&self, payload: HookPayload) -> Result<Vec<HookOutput>, AgentError> {
        if !self.inner.hooks.has_hooks(payload.event()) {
            return Ok(Vec::new());
        }
        let input = self.hook_input(payload);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AgentError::Cancelled),
            outputs = self.inner.hooks.emit(&input, None) => Ok(outputs),
        }
    }

    async fn emit_for_tool(
        &self,
        payload: HookPayload,
        call: &ToolCall,
    ) -> Result<Vec<HookOutput>, AgentError> {
        if !self.inner.hooks.has_hooks(payload.event()) {
            return Ok(Vec::new());
        }
        let input = self.hook_input(payload);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AgentError::Cancelled),
            outputs = self.inner.hooks.emit_for_tool(&input, &call.name, Some(call.id.as_str())) => {
                Ok(outputs)
            }
        }
    }

    fn hook_input(&self, payload: HookPayload) -> HookInput {
        HookInput {
            session_id: self.inner.session_id.clone(),
            cwd: self.inner.options.cwd.display().to_string(),
            permission_mode: self.inner.permissions.mode(),
            payload,
        }
    }

    fn init_message(&self) -> Message {
        Message::System(SystemMessage {
            id: new_message_id(),
            session_id: self.inner.session_id.clone(),
            subtype: "init".into(),
            model: self.inner.model().to_string(),
            provider: self.inner.provider.name().to_string(),
            tools: self.inner.tools.names(),
            cwd: self.inner.options.cwd.display().to_string(),
            permission_mode: self.inner.permissions.mode().as_str().to_string(),
            mcp_servers: self.inner.options.mcp_servers.keys().cloned().collect(),
        })
    }

    fn tool_result(&self, call: &ToolCall, result: Value, is_error: bool) -> ToolResultMessage {
        ToolResultMessage {
            id: new_message_id(),
            session_id: self.inner.session_id.clone(),
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            result,
            is_error,
        }
    }

    fn error_result(&self, call: &ToolCall, reason: String) -> ToolResultMessage {
        self.tool_result(call, Value::String(reason), true)
    }

    async fn send_result(
        &mut self,
        outcome: ResultOutcome,
        result: Option<String>,
        structured_output: Option<Value>,
        errors: Vec<String>,
    ) -> Result<(), AgentError> {
        let message = Message::Result(ResultMessage {
            id: new_message_id(),
            session_id: self.inner.session_id.clone(),
            outcome,
            duration_ms: self.started_at.elapsed().as_millis() as u64,
            turns: self.turns,
            usage: self.usage,
            result,
            structured_output,
            errors,
        });
        self.send(message).await
    }

    async fn send(&self, message: Message) -> Result<(), AgentError> {
        self.events
            .send(Ok(message))
            .await
            .map_err(|_| AgentError::ChannelClosed)
    }

    fn check_cancelled(&self) -> Result<(), AgentError> {
        if self.cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        Ok(())
    }
}

/// Replayable history minus tool calls that never received a result.
fn replayable_history(history: Vec<Message>) -> Vec<Message> {
    let answered: HashSet<String> = history
        .iter()
        .filter_map(Message::as_tool_result)
        .map(|result| result.tool_call_id.clone())
        .collect();
    history
        .into_iter()
        .filter(Message::is_replayable)
        .filter_map(|message| match message {
            Message::Assistant(mut assistant) if assistant.has_tool_calls() => {
                assistant
                    .tool_calls
                    .retain(|call| answered.contains(&call.id));
                let keep = assistant.has_tool_calls() || !assistant.text_parts.is_empty();
                keep.then_some(Message::Assistant(assistant))
            }
            other => Some(other),
        })
        .collect()
}

/// Parse a final answer as JSON, tolerating a surrounding code fence.
fn parse_json_answer(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(body.trim()).ok()
}

#[cfg(test)]
mod parse_tests {
    use super::parse_json_answer;
    use serde_json::json;

    #[test]
    fn fenced_and_bare_json_answers_parse() {
        assert_eq!(parse_json_answer(" {\"a\": 1} "), Some(json!({"a": 1})));
        assert_eq!(
            parse_json_answer("```json\n{\"a\": 2}\n```"),
            Some(json!({"a": 2}))
        );
        assert_eq!(parse_json_answer("three lines"), None);
    }
}
