//! End-to-end engine runs against scripted inference.
//!
//! Every test wires real drivers, processors and criteria together; only
//! the model is replaced by a script.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use stepwise_config::AppConfig;
use stepwise_core::{
    ErrorKind, ExecutionState, ExecutionStatus, FinishReason, Inference, InferenceRequest,
    InferenceResponse, Message, MessageToolCall, ProviderError, StepType, StopReason, Tool,
    Summarizer, ToolError, ToolRegistry, ToolResult, Usage,
};
use stepwise_engine::{
    ChatDriver, ContinuationCriteria, Engine, EngineBuilder, ErrorHandler, ExecutionTimeLimit,
    InferenceOptions, ReActDriver, StepDriver, StepsLimit, StopOnFinalDecision, ToolDispatchDriver, ToolExecutor, ToolPolicy,
};

// ── Test doubles ──────────────────────────────────────────────────────────

struct ScriptedInference {
    responses: Mutex<VecDeque<Result<InferenceResponse, ProviderError>>>,
    requests: Mutex<Vec<InferenceRequest>>,
}

impl ScriptedInference {
    fn new(responses: Vec<Result<InferenceResponse, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn texts(texts: &[&str]) -> Arc<Self> {
        Self::new(texts.iter().map(|t| Ok(text(t))).collect())
    }

    fn requests(&self) -> Vec<InferenceRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Inference for ScriptedInference {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: InferenceRequest) -> Result<InferenceResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .expect("script exhausted")
    }
}

fn text(content: &str) -> InferenceResponse {
    InferenceResponse {
        message: Message::assistant(content),
        finish_reason: Some(FinishReason::Stop),
        usage: Usage::new(10, 5),
        model: "mock-model".into(),
    }
}

fn calling(name: &str, args: serde_json::Value) -> InferenceResponse {
    InferenceResponse {
        message: Message::assistant("").with_tool_calls(vec![MessageToolCall {
            id: format!("call_{name}"),
            name: name.into(),
            arguments: args.to_string(),
        }]),
        finish_reason: Some(FinishReason::ToolCalls),
        usage: Usage::new(10, 5),
        model: "mock-model".into(),
    }
}

struct WeatherTool;

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "weather"
    }

    fn description(&self) -> &str {
        "Current weather for a city"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({"type": "object", "properties": {"city": {"type": "string"}}, "required": ["city"]})
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let city = arguments["city"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("`city` is required".into()))?;
        Ok(ToolResult::ok("", format!("Sunny in {city}, 21°C"))
            .with_data(json!({"city": city, "temp_c": 21})))
    }
}

/// Returns a fixed summary and records what it was asked to condense.
#[derive(Default)]
struct RecordingSummarizer {
    inputs: Mutex<Vec<Vec<Message>>>,
}

#[async_trait]
impl Summarizer for RecordingSummarizer {
    async fn summarize(&self, messages: &[Message], _token_limit: usize) -> Result<String, ProviderError> {
        self.inputs.lock().unwrap().push(messages.to_vec());
        Ok("The user said hello.".into())
    }
}

fn registry() -> ToolRegistry {
    ToolRegistry::new().with_tool(Arc::new(WeatherTool))
}

fn chat_engine(inference: Arc<ScriptedInference>, criteria: ContinuationCriteria) -> Engine {
    let driver: Arc<dyn StepDriver> = Arc::new(ChatDriver::new(inference, InferenceOptions::new("m")));
    Engine::builder(driver).with_criteria(criteria).build()
}

fn react_engine(inference: Arc<ScriptedInference>, threshold: usize) -> Engine {
    let driver = ReActDriver::new(inference, ToolExecutor::new(registry()), InferenceOptions::new("m"));
    Engine::builder(Arc::new(driver))
        .with_criteria(
            ContinuationCriteria::new()
                .with(StepsLimit(10))
                .with(StopOnFinalDecision),
        )
        .with_error_handler(ErrorHandler::new(threshold))
        .build()
}

// ── Scenarios ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn steps_limit_of_two() {
    let engine = chat_engine(
        ScriptedInference::texts(&["one", "two"]),
        ContinuationCriteria::new().with(StepsLimit(2)),
    );

    let state = engine.next_step(ExecutionState::new()).await;
    assert_eq!(state.step_count(), 1);
    assert!(engine.has_next_step(&state));

    let state = engine.next_step(state).await;
    assert_eq!(state.step_count(), 2);
    assert!(!engine.has_next_step(&state));
    assert_eq!(state.status(), ExecutionStatus::Completed);
    assert_eq!(
        state.current_step().unwrap().outcome.as_ref().unwrap().stop_reason,
        Some(StopReason::StepsLimitReached)
    );
}

#[tokio::test]
async fn chat_hello_hi() {
    let driver: Arc<dyn StepDriver> = Arc::new(ChatDriver::new(
        ScriptedInference::texts(&["Hi!"]),
        InferenceOptions::new("m"),
    ));
    let engine = Engine::builder(driver).build();

    let state = engine
        .final_step(ExecutionState::from_messages(vec![Message::user("Hello")]))
        .await;

    assert_eq!(state.step_count(), 1);
    assert_eq!(state.status(), ExecutionStatus::Completed);
    assert_eq!(state.current_step().unwrap().output_text(), "Hi!");
    assert_eq!(state.usage().total(), 15);
}

#[tokio::test]
async fn blocked_tool_is_observed_and_the_run_goes_on() {
    let inference = ScriptedInference::new(vec![
        Ok(calling("weather", json!({"city": "Paris"}))),
        Ok(text("I cannot check the weather right now.")),
    ]);
    let executor = ToolExecutor::new(registry()).with_policy(ToolPolicy::deny(["weather"]));
    let driver = ToolDispatchDriver::new(inference.clone(), executor, InferenceOptions::new("m"));
    let engine = Engine::builder(Arc::new(driver)).build();

    let seed = ExecutionState::from_messages(vec![Message::user("Weather in Paris?")]);
    let first = engine.next_step(seed).await;
    let step = first.current_step().unwrap();
    assert_eq!(step.step_type(), StepType::ToolExecution);
    assert_eq!(step.errors[0].kind, ErrorKind::ToolBlocked);
    assert_eq!(first.status(), ExecutionStatus::InProgress);
    let observation = &step.output_messages[1].content;
    assert!(observation.contains("blocked"));
    assert!(observation.contains("weather"));
    assert!(engine.has_next_step(&first));

    let second = engine.next_step(first).await;
    assert_eq!(second.step_count(), 2);
    assert_eq!(second.current_step().unwrap().step_type(), StepType::Final);
    assert_eq!(second.status(), ExecutionStatus::Completed);

    // The second model call saw the observation.
    let requests = inference.requests();
    assert!(requests[1]
        .messages
        .iter()
        .any(|m| m.content.contains("weather") && m.content.contains("blocked")));
}

#[tokio::test]
async fn three_extraction_failures_fail_the_run() {
    let engine = react_engine(
        ScriptedInference::texts(&["not json", "still not json", "nope"]),
        3,
    );

    let state = engine.next_step(ExecutionState::new()).await;
    assert_eq!(state.status(), ExecutionStatus::InProgress);
    let state = engine.next_step(state).await;
    assert_eq!(state.status(), ExecutionStatus::InProgress);
    assert_eq!(state.consecutive_failures(), 2);
    let state = engine.next_step(state).await;

    assert_eq!(state.status(), ExecutionStatus::Failed);
    assert_eq!(state.consecutive_failures(), 3);
    let step = state.current_step().unwrap();
    assert_eq!(step.step_type(), StepType::Failure);
    assert!(step.errors_as_string().contains("Failed to extract decision"));
    assert_eq!(
        step.outcome.as_ref().unwrap().stop_reason,
        Some(StopReason::ErrorThreshold)
    );
    assert!(!engine.has_next_step(&state));
}

#[tokio::test]
async fn a_success_resets_the_failure_count() {
    let engine = react_engine(
        ScriptedInference::texts(&[
            "not json",
            "still not json",
            r#"{"thought": "check it", "action": "call_tool", "tool": "weather", "arguments": {"city": "Oslo"}}"#,
            r#"{"thought": "done", "action": "final_answer", "answer": "Sunny in Oslo."}"#,
        ]),
        3,
    );

    let mut state = ExecutionState::new();
    for _ in 0..3 {
        state = engine.next_step(state).await;
    }
    assert_eq!(state.consecutive_failures(), 0);
    assert_eq!(state.total_failures(), 2);
    assert_eq!(state.status(), ExecutionStatus::InProgress);
    assert_eq!(state.metadata()["weather"]["temp_c"], 21);

    let state = engine.final_step(state).await;
    assert_eq!(state.status(), ExecutionStatus::Completed);
    assert_eq!(state.current_step().unwrap().output_text(), "Sunny in Oslo.");
}

// ── Properties ────────────────────────────────────────────────────────────

#[tokio::test]
async fn history_is_append_only() {
    let engine = chat_engine(
        ScriptedInference::texts(&["a", "b", "c"]),
        ContinuationCriteria::new().with(StepsLimit(3)),
    );
    let mut state = ExecutionState::new();
    let mut snapshots = Vec::new();
    while engine.has_next_step(&state) {
        let before = state.step_count();
        snapshots.push(state.clone());
        state = engine.next_step(state).await;
        assert_eq!(state.step_count(), before + 1);
    }
    assert_eq!(state.step_count(), 3);
    let counts: Vec<_> = snapshots.iter().map(|s| s.step_count()).collect();
    assert_eq!(counts, vec![0, 1, 2]);
}

#[tokio::test]
async fn failing_inference_never_escapes() {
    let engine = chat_engine(
        ScriptedInference::new(vec![
            Err(ProviderError::Network("connection reset".into())),
            Err(ProviderError::Network("connection reset".into())),
            Err(ProviderError::Network("connection reset".into())),
        ]),
        ContinuationCriteria::new().with(StepsLimit(10)),
    );

    let state = engine.next_step(ExecutionState::new()).await;
    let step = state.current_step().unwrap();
    assert_eq!(step.step_type(), StepType::Failure);
    assert_eq!(step.errors[0].kind, ErrorKind::Inference);
    assert_eq!(state.status(), ExecutionStatus::InProgress);

    let state = engine.final_step(state).await;
    assert_eq!(state.step_count(), 3);
    assert_eq!(state.status(), ExecutionStatus::Failed);
    assert!(state
        .current_step()
        .unwrap()
        .errors_as_string()
        .contains("connection reset"));
}

#[tokio::test]
async fn replay_is_deterministic() {
    async fn run() -> (Vec<StepType>, Vec<String>, Vec<Vec<String>>) {
        let inference = ScriptedInference::new(vec![
            Ok(calling("weather", json!({"city": "Rome"}))),
            Ok(text("Sunny in Rome.")),
        ]);
        let driver = ToolDispatchDriver::new(
            inference.clone(),
            ToolExecutor::new(registry()),
            InferenceOptions::new("m"),
        );
        let engine = Engine::builder(Arc::new(driver)).build();
        let state = engine
            .final_step(ExecutionState::from_messages(vec![Message::user("Rome?")]))
            .await;
        let types = state.steps().map(|s| s.step_type()).collect();
        let texts = state.steps().map(|s| s.output_text()).collect();
        let tools = inference
            .requests()
            .iter()
            .map(|r| r.tools.iter().map(|t| t.name.clone()).collect())
            .collect();
        (types, texts, tools)
    }

    let first = run().await;
    let second = run().await;
    assert_eq!(first, second);
    assert_eq!(first.0, vec![StepType::ToolExecution, StepType::Final]);
}

#[tokio::test]
async fn configured_buffering_summarizes_old_history() {
    let mut config = AppConfig::default();
    config.engine.time_limit_secs = Some(600);
    config.buffer.enabled = true;
    config.buffer.max_active_tokens = 20;
    config.buffer.summarize = true;
    config.buffer.max_buffer_tokens = 1;
    config.buffer.max_summary_tokens = 64;

    let inference = ScriptedInference::texts(&["Sunny all week."]);
    let summarizer = Arc::new(RecordingSummarizer::default());
    let driver: Arc<dyn StepDriver> = Arc::new(ChatDriver::new(inference.clone(), InferenceOptions::new("m")));
    let engine = EngineBuilder::from_config(driver, &config, Some(summarizer.clone())).build();
    assert_eq!(
        engine.criteria().ids(),
        vec!["steps_limit", "stop_on_final_decision", "execution_time_limit"]
    );

    // 12 + 8 + 11 estimated tokens: only the first message overflows.
    let seed = ExecutionState::from_messages(vec![
        Message::user("Hello there, how are you today?"),
        Message::assistant("Fine, thanks."),
        Message::user("And what's the weather like?"),
    ]);
    let state = engine.final_step(seed).await;
    assert_eq!(state.status(), ExecutionStatus::Completed);

    let inputs = summarizer.inputs.lock().unwrap().clone();
    assert_eq!(inputs.len(), 1);
    assert_eq!(inputs[0].len(), 1);
    assert_eq!(inputs[0][0].content, "Hello there, how are you today?");

    let requests = inference.requests();
    let sent: Vec<&str> = requests[0].messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(sent.len(), 3);
    assert!(sent[0].starts_with("Summary of the earlier conversation"));
    assert!(sent[0].contains("The user said hello."));
    assert_eq!(&sent[1..], ["Fine, thanks.", "And what's the weather like?"]);

    assert_eq!(state.store().section_names(), vec!["summary", "messages"]);
    assert_eq!(state.messages().last().unwrap().content, "Sunny all week.");
}

#[tokio::test]
async fn resumed_state_gets_a_fresh_time_limit() {
    let criteria = ContinuationCriteria::new()
        .with(StepsLimit(5))
        .with(ExecutionTimeLimit(Duration::from_secs(60)))
        .with(StopOnFinalDecision);
    let an_hour_ago = chrono::Utc::now() - chrono::Duration::hours(1);
    let seed = || ExecutionState::from_messages(vec![Message::user("Still there?")]).with_started_at(an_hour_ago);

    let engine = chat_engine(ScriptedInference::texts(&["Yes."]), criteria.clone());
    let state = engine.final_step(seed()).await;
    assert_eq!(state.step_count(), 1);
    assert_eq!(
        state.current_step().unwrap().outcome.as_ref().unwrap().stop_reason,
        Some(StopReason::FinalDecision)
    );

    let engine = chat_engine(ScriptedInference::texts(&["Yes."]), criteria);
    let states: Vec<_> = engine.iterator(seed()).collect().await;
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].status(), ExecutionStatus::Completed);
}
