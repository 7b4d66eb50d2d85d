//! Error handler: turns pipeline errors into failure steps and decides
//! whether the run can go on.
//!
//! Classification is a pure function of the error and the step history;
//! timestamps are stamped by the orchestrator.

use serde::{Deserialize, Serialize};
use stepwise_core::{
    ContinuationEvaluation, ContinuationOutcome, ErrorKind, ExecutionState, ExecutionStatus, Step,
    StepError, StopReason,
};

use crate::error::EngineError;

const CRITERION: &str = "error_handler";

/// Classified view of an error against the run so far. Counts include the
/// failure being classified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContext {
    pub kind: ErrorKind,
    pub consecutive_failures: usize,
    pub total_failures: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

/// What the handler decided for one error.
#[derive(Debug, Clone)]
pub struct ErrorHandlingResult {
    pub step: Step,
    pub context: ErrorContext,
    pub outcome: ContinuationOutcome,
    pub final_status: ExecutionStatus,
    pub error: StepError,
}

#[derive(Debug, Clone, Copy)]
pub struct ErrorHandler {
    max_consecutive_failures: usize,
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::new(3)
    }
}

impl ErrorHandler {
    pub fn new(max_consecutive_failures: usize) -> Self {
        Self {
            max_consecutive_failures: max_consecutive_failures.max(1),
        }
    }

    pub fn max_consecutive_failures(&self) -> usize {
        self.max_consecutive_failures
    }

    pub fn classify(&self, error: &EngineError, state: &ExecutionState) -> ErrorContext {
        ErrorContext {
            kind: error.kind(),
            consecutive_failures: state.consecutive_failures() + 1,
            total_failures: state.total_failures() + 1,
            tool_name: error.tool_name().map(str::to_string),
        }
    }

    /// Build the failure step for an error raised while producing the next
    /// step of `state`.
    pub fn handle(&self, error: EngineError, state: &ExecutionState) -> ErrorHandlingResult {
        let context = self.classify(&error, state);
        let mut step_error = StepError::new(context.kind, error.to_string());
        if let Some(tool) = &context.tool_name {
            step_error = step_error.with_tool(tool.clone());
        }

        let step = Step::failure(state.messages().to_vec(), step_error.clone());
        let (outcome, final_status) = self.decide(context.consecutive_failures);

        ErrorHandlingResult {
            step,
            context,
            outcome,
            final_status,
            error: step_error,
        }
    }

    /// Forced stop once the trailing failures of `state` reach the threshold.
    pub fn assess(&self, state: &ExecutionState) -> Option<ContinuationOutcome> {
        let (outcome, status) = self.decide(state.consecutive_failures());
        (status == ExecutionStatus::Failed).then_some(outcome)
    }

    fn decide(&self, consecutive_failures: usize) -> (ContinuationOutcome, ExecutionStatus) {
        if consecutive_failures >= self.max_consecutive_failures {
            let eval = ContinuationEvaluation::stop(
                CRITERION,
                format!("{consecutive_failures} consecutive failures"),
                StopReason::ErrorThreshold,
            )
            .with_context("consecutive_failures", consecutive_failures)
            .with_context("max_consecutive_failures", self.max_consecutive_failures);
            (ContinuationOutcome::forced_stop(eval), ExecutionStatus::Failed)
        } else {
            let eval = ContinuationEvaluation::proceed(
                CRITERION,
                format!(
                    "{consecutive_failures} of {} allowed consecutive failures",
                    self.max_consecutive_failures
                ),
            )
            .with_context("consecutive_failures", consecutive_failures);
            (
                ContinuationOutcome::from_evaluations(vec![eval]),
                ExecutionStatus::InProgress,
            )
        }
    }
}
