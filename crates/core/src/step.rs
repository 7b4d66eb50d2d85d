//! Step: the record of one engine iteration.
//!
//! A step is built once by a driver (or by the error handler) and then only
//! ever replaced by a new value: the orchestrator stamps completion time and
//! attaches the continuation outcome through `with_*` constructors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::continuation::ContinuationOutcome;
use crate::error::ToolError;
use crate::inference::FinishReason;
use crate::message::{join_contents, Message};
use crate::tool::{ToolCall, ToolResult};
use crate::usage::Usage;

/// What kind of iteration a step records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    /// A model call whose output is not yet a final answer
    Inference,
    /// The model requested tools and they were executed
    ToolExecution,
    /// The model produced its answer
    Final,
    /// Nothing usable came out of this iteration
    Failure,
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Inference => "inference",
            Self::ToolExecution => "tool_execution",
            Self::Final => "final",
            Self::Failure => "failure",
        };
        f.write_str(name)
    }
}

/// Classified error kinds recorded on steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DecisionExtraction,
    ToolExecution,
    ToolBlocked,
    Inference,
    Processor,
    Cancelled,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::DecisionExtraction => "decision_extraction",
            Self::ToolExecution => "tool_execution",
            Self::ToolBlocked => "tool_blocked",
            Self::Inference => "inference",
            Self::Processor => "processor",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// A captured error, stored as plain data so steps stay serializable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl StepError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            tool_name: None,
        }
    }

    pub fn with_tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }
}

impl From<&ToolError> for StepError {
    fn from(err: &ToolError) -> Self {
        let kind = match err {
            ToolError::Blocked { .. } => ErrorKind::ToolBlocked,
            _ => ErrorKind::ToolExecution,
        };
        Self {
            kind,
            message: err.to_string(),
            tool_name: err.tool_name().map(str::to_string),
        }
    }
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// One tool invocation and what came of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecution {
    pub call: ToolCall,
    pub result: std::result::Result<ToolResult, StepError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ToolExecution {
    pub fn is_error(&self) -> bool {
        match &self.result {
            Ok(result) => !result.success,
            Err(_) => true,
        }
    }

    pub fn error(&self) -> Option<&StepError> {
        self.result.as_ref().err()
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0) as u64
    }
}

/// The immutable record of one iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub step_type: StepType,
    /// Messages the driver sent to the model
    #[serde(default)]
    pub input_messages: Vec<Message>,
    /// Messages this step contributes to the conversation
    #[serde(default)]
    pub output_messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_executions: Vec<ToolExecution>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<StepError>,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Stamped by the orchestrator once the iteration is over
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Continuation outcome evaluated right after this step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ContinuationOutcome>,
}

impl Step {
    pub fn new(step_type: StepType, input_messages: Vec<Message>, output_messages: Vec<Message>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            step_type,
            input_messages,
            output_messages,
            tool_calls: Vec::new(),
            tool_executions: Vec::new(),
            errors: Vec::new(),
            usage: Usage::default(),
            finish_reason: None,
            metadata: serde_json::Map::new(),
            completed_at: None,
            outcome: None,
        }
    }

    /// A step recording that the iteration failed.
    pub fn failure(input_messages: Vec<Message>, error: StepError) -> Self {
        let mut step = Self::new(StepType::Failure, input_messages, Vec::new());
        step.errors.push(error);
        step
    }

    pub fn with_output_messages(mut self, messages: Vec<Message>) -> Self {
        self.output_messages = messages;
        self
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    /// Record executions; their errors are also copied into `errors`.
    pub fn with_tool_executions(mut self, executions: Vec<ToolExecution>) -> Self {
        self.errors
            .extend(executions.iter().filter_map(|e| e.error().cloned()));
        self.tool_executions = executions;
        self
    }

    pub fn with_error(mut self, error: StepError) -> Self {
        self.errors.push(error);
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_finish_reason(mut self, reason: Option<FinishReason>) -> Self {
        self.finish_reason = reason;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }

    pub fn with_outcome(mut self, outcome: ContinuationOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    pub fn step_type(&self) -> StepType {
        self.step_type
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// A step counts as failed if it is a Failure step, carries errors, or
    /// any of its tool executions errored.
    pub fn has_errors(&self) -> bool {
        self.step_type == StepType::Failure
            || !self.errors.is_empty()
            || self.tool_executions.iter().any(ToolExecution::is_error)
    }

    /// All recorded errors, one per line.
    pub fn errors_as_string(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The text of the output messages.
    pub fn output_text(&self) -> String {
        join_contents(&self.output_messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::continuation::{ContinuationEvaluation, StopReason};

    fn execution(result: std::result::Result<ToolResult, StepError>) -> ToolExecution {
        let now = Utc::now();
        ToolExecution {
            call: ToolCall::new("c1", "search", serde_json::json!({"q": "rust"})),
            result,
            started_at: now,
            finished_at: now,
        }
    }

    #[test]
    fn failure_step_carries_error() {
        let step = Step::failure(
            vec![Message::user("hi")],
            StepError::new(ErrorKind::Inference, "connection reset"),
        );
        assert_eq!(step.step_type(), StepType::Failure);
        assert!(step.has_errors());
        assert_eq!(step.errors_as_string(), "[inference] connection reset");
        assert!(step.output_messages.is_empty());
    }

    #[test]
    fn output_text_joins_messages() {
        let step = Step::new(StepType::Final, vec![], vec![Message::assistant("Hi!")]);
        assert_eq!(step.output_text(), "Hi!");
        assert!(!step.has_errors());
    }

    #[test]
    fn tool_execution_errors_propagate_to_step() {
        let blocked = ToolError::Blocked {
            tool_name: "search".into(),
            reason: "denied".into(),
        };
        let step = Step::new(StepType::ToolExecution, vec![], vec![])
            .with_tool_executions(vec![execution(Err(StepError::from(&blocked)))]);
        assert!(step.has_errors());
        assert_eq!(step.errors.len(), 1);
        assert_eq!(step.errors[0].kind, ErrorKind::ToolBlocked);
        assert_eq!(step.errors[0].tool_name.as_deref(), Some("search"));
    }

    #[test]
    fn successful_execution_is_not_an_error() {
        let step = Step::new(StepType::ToolExecution, vec![], vec![])
            .with_tool_executions(vec![execution(Ok(ToolResult::ok("c1", "found")))]);
        assert!(!step.has_errors());
    }

    #[test]
    fn with_outcome_returns_new_value() {
        let step = Step::new(StepType::Final, vec![], vec![]);
        let stamped = step
            .clone()
            .with_outcome(ContinuationOutcome::forced_stop(ContinuationEvaluation::stop(
                "final",
                "answer",
                StopReason::FinalDecision,
            )));
        assert!(step.outcome.is_none());
        assert_eq!(stamped.id, step.id);
        assert!(!stamped.outcome.unwrap().should_continue());
    }

    #[test]
    fn step_serialization_roundtrip_keeps_tool_results() {
        let step = Step::new(StepType::ToolExecution, vec![], vec![])
            .with_tool_executions(vec![execution(Ok(ToolResult::ok("c1", "found")))]);
        let json = serde_json::to_string(&step).unwrap();
        let back: Step = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tool_executions, step.tool_executions);
        assert_eq!(back.step_type, StepType::ToolExecution);
    }
}
