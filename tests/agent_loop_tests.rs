// Agent loop integration tests
//
// End-to-end runs through the public builder with a scripted provider.

mod support;

use futures::StreamExt;
use open_agent_core::testing::{ScriptedProvider, StaticTool};
use open_agent_core::{
    AgentError, AgentLoop, AgentOptions, AssistantMessage, Message, PermissionDecision,
    PermissionMode, ResultOutcome, ToolCall, logging,
};
use serde_json::{Value, json};
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;
use support::{PanickingProvider, PanickingTool, READ_PROMPT, kinds, read_scenario_provider};
use tokio_util::sync::CancellationToken;

fn read_tool() -> StaticTool {
    StaticTool::new("Read", json!({"content": "a\nb\nc"}))
}

#[tokio::test]
async fn read_then_answer_produces_the_expected_sequence() {
    let provider = read_scenario_provider();
    let read = read_tool();
    let agent = AgentLoop::builder(provider.clone())
        .options(AgentOptions::new().with_max_turns(5))
        .tool(read.clone())
        .build()
        .unwrap();

    let messages = agent
        .run(READ_PROMPT, Vec::new(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        kinds(&messages),
        vec!["system", "assistant+tools", "tool_result", "assistant", "result"]
    );

    let call = &messages[1].as_assistant().unwrap().tool_calls;
    assert_eq!(call.len(), 1);
    assert_eq!(call[0].name, "Read");

    let tool_result = messages[2].as_tool_result().unwrap();
    assert_eq!(tool_result.tool_call_id, "call-read");
    assert!(!tool_result.is_error);
    assert_eq!(tool_result.result, json!({"content": "a\nb\nc"}));
    assert_eq!(read.inputs(), vec![json!({"file_path": "X"})]);

    let result = messages[4].as_result().unwrap();
    assert_eq!(result.outcome, ResultOutcome::Success);
    assert_eq!(result.result.as_deref(), Some("X has 3 lines."));
    assert_eq!(result.turns, 2);

    // second request replays the prompt, the tool call and its result
    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        kinds(&requests[1].messages),
        vec!["user", "assistant+tools", "tool_result"]
    );
}

#[tokio::test]
async fn denied_read_is_reported_to_the_model_and_the_run_continues() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .tool_turn(vec![ToolCall::new(
                "call-read",
                "Read",
                r#"{"file_path":"X"}"#,
            )])
            .text_turn("I was not allowed to read X."),
    );
    let read = read_tool();
    let agent = AgentLoop::builder(provider)
        .options(AgentOptions::new().with_permission_mode(PermissionMode::Default))
        .tool(read.clone())
        .build()
        .unwrap();
    agent
        .permissions()
        .set_restriction(Some(vec!["Glob".to_string()]));

    let messages = agent
        .run(READ_PROMPT, Vec::new(), CancellationToken::new())
        .await
        .unwrap();

    let tool_result = messages
        .iter()
        .find_map(Message::as_tool_result)
        .expect("tool result");
    assert!(tool_result.is_error);
    assert_eq!(tool_result.result, Value::String("Read not allowed".into()));
    assert_eq!(read.call_count(), 0);

    let result = messages.last().and_then(Message::as_result).unwrap();
    assert!(result.is_success());
    assert_eq!(result.result.as_deref(), Some("I was not allowed to read X."));
}

#[tokio::test]
async fn approval_handler_denial_of_a_sensitive_tool_reaches_the_model() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .tool_turn(vec![ToolCall::new(
                "call-bash",
                "Bash",
                r#"{"command":"rm -rf build"}"#,
            )])
            .text_turn("The command was declined."),
    );
    let bash = StaticTool::new("Bash", json!({"exitCode": 0}));
    let asked = Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen = asked.clone();
    let agent = AgentLoop::builder(provider.clone())
        .tool(bash.clone())
        .approval(move |tool: &str, input: &Value| {
            seen.lock().unwrap().push((tool.to_string(), input.clone()));
            PermissionDecision::deny("user declined")
        })
        .build()
        .unwrap();

    let messages = agent
        .run("clean the build", Vec::new(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        *asked.lock().unwrap(),
        vec![("Bash".to_string(), json!({"command": "rm -rf build"}))]
    );
    assert_eq!(bash.call_count(), 0);
    let tool_result = messages.iter().find_map(Message::as_tool_result).unwrap();
    assert!(tool_result.is_error);
    assert_eq!(tool_result.result, json!("user declined"));

    // the denial is replayed to the model on the next turn
    let requests = provider.requests();
    let replayed = requests[1].messages.last().unwrap().as_tool_result().unwrap();
    assert_eq!(replayed.tool_call_id, "call-bash");
    assert!(messages.last().and_then(Message::as_result).unwrap().is_success());
}

#[tokio::test]
async fn panicking_tool_becomes_an_error_result() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .tool_turn(vec![ToolCall::new("call-grep", "Grep", "{}")])
            .text_turn("Grep is broken."),
    );
    let agent = AgentLoop::builder(provider)
        .tool(PanickingTool("Grep"))
        .build()
        .unwrap();

    let messages = agent
        .run("search", Vec::new(), CancellationToken::new())
        .await
        .unwrap();

    let tool_result = messages.iter().find_map(Message::as_tool_result).unwrap();
    assert!(tool_result.is_error);
    assert_eq!(tool_result.result, json!("tool panicked: disk on fire"));
    assert!(messages.last().and_then(Message::as_result).unwrap().is_success());
}

#[tokio::test]
async fn run_that_dies_without_a_result_is_an_error() {
    let agent = AgentLoop::builder(Arc::new(PanickingProvider)).build().unwrap();

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        agent.run("hello", Vec::new(), CancellationToken::new()),
    )
    .await
    .expect("dead run is reported promptly");

    assert!(matches!(outcome, Err(AgentError::ChannelClosed)));
}

#[tokio::test]
async fn unanswered_tool_calls_are_not_replayed() {
    let provider = Arc::new(ScriptedProvider::new().text_turn("fresh start"));
    let agent = AgentLoop::builder(provider.clone()).build().unwrap();
    let session_id = agent.session_id().to_string();

    let orphan = AssistantMessage {
        id: "a-1".into(),
        session_id: session_id.clone(),
        text_parts: vec!["checking".into()],
        tool_calls: vec![ToolCall::new("call-lost", "Read", r#"{"file_path":"X"}"#)],
        model: None,
        usage: None,
        stop_reason: None,
        timestamp: chrono::Utc::now(),
    };
    let history = vec![
        Message::user(session_id.as_str(), "read X"),
        Message::Assistant(orphan),
    ];

    agent
        .run("try again", history, CancellationToken::new())
        .await
        .unwrap();

    let request = provider.requests().pop().unwrap();
    assert_eq!(kinds(&request.messages), vec!["user", "assistant", "user"]);
    let replayed = request.messages[1].as_assistant().unwrap();
    assert!(replayed.tool_calls.is_empty());
    assert_eq!(replayed.text(), "checking");
}

#[tokio::test]
async fn plan_mode_logs_calls_to_unknown_tools() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .tool_turn(vec![ToolCall::new("call-tp", "Teleport", r#"{"to":"mars"}"#)])
            .text_turn("Plan ready."),
    );
    let agent = AgentLoop::builder(provider)
        .options(AgentOptions::new().with_permission_mode(PermissionMode::Plan))
        .build()
        .unwrap();

    let messages = agent
        .run("plan a trip", Vec::new(), CancellationToken::new())
        .await
        .unwrap();

    let log = agent.permissions().plan_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].tool_name, "Teleport");
    assert_eq!(log[0].input, json!({"to": "mars"}));
    let tool_result = messages.iter().find_map(Message::as_tool_result).unwrap();
    assert_eq!(tool_result.result, json!("tool 'Teleport' not found"));
}

#[tokio::test]
async fn pre_cancelled_run_fails_fast_without_calling_the_provider() {
    let provider = read_scenario_provider();
    let agent = AgentLoop::builder(provider.clone())
        .tool(read_tool())
        .build()
        .unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = tokio::time::timeout(
        Duration::from_secs(1),
        agent.run(READ_PROMPT, Vec::new(), cancel),
    )
    .await
    .expect("cancelled run returns promptly");

    assert!(matches!(outcome, Err(AgentError::Cancelled)));
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn stream_yields_messages_as_they_are_produced() {
    let agent = AgentLoop::builder(read_scenario_provider())
        .tool(read_tool())
        .build()
        .unwrap();

    let mut stream = agent.run_stream(READ_PROMPT, Vec::new(), CancellationToken::new());
    let first = stream.next().await.unwrap().unwrap();
    let Message::System(init) = first else {
        panic!("expected init message, got {first:?}");
    };
    assert_eq!(init.subtype, "init");
    assert_eq!(init.tools, vec!["Read".to_string()]);
    assert_eq!(init.session_id, agent.session_id());

    let rest: Vec<_> = stream.map(Result::unwrap).collect().await;
    assert_eq!(rest.len(), 4);
    assert!(rest.iter().all(|m| m.session_id() == agent.session_id()));
}

#[tokio::test]
async fn cancelling_mid_run_interrupts_the_provider_call() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .with_delay(Duration::from_secs(30))
            .text_turn("too late"),
    );
    let agent = AgentLoop::builder(provider).build().unwrap();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        agent.run("slow question", Vec::new(), cancel),
    )
    .await
    .expect("interrupted run returns promptly");

    assert!(outcome.unwrap_err().is_cancelled());
}

#[tokio::test]
#[serial]
async fn tracing_can_be_initialised_alongside_runs() {
    logging::init_tracing("open_agent_core=debug");
    logging::init_tracing("warn");
    assert!(logging::is_initialized());

    let messages = AgentLoop::builder(Arc::new(ScriptedProvider::new().text_turn("hi")))
        .build()
        .unwrap()
        .run("hello", Vec::new(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(kinds(&messages), vec!["system", "assistant", "result"]);
}
