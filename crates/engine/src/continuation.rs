//! Continuation policy: composable stop/continue criteria.
//!
//! Each criterion votes independently on the new state. The votes are
//! combined by [`ContinuationOutcome::from_evaluations`]: any stop vote
//! stops the run and the first one in list order names the reason.
//!
//! # Built-in criteria
//!
//! - [`StepsLimit`]: stop once the step count reaches a ceiling
//! - [`StopOnFinalDecision`]: stop once the driver produced an answer
//! - [`TokenUsageLimit`]: stop once accumulated usage reaches a budget
//! - [`ExecutionTimeLimit`]: stop once the run has been going too long
//! - [`FinishReasonCheck`]: stop on specific model finish reasons
//! - [`ErrorPresenceCheck`]: stop after a run of failed steps

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use stepwise_config::EngineConfig;
use stepwise_core::{
    ContinuationEvaluation, ContinuationOutcome, ExecutionState, FinishReason, StepType, StopReason,
};

/// A single stop/continue vote.
pub trait ContinuationCriterion: Send + Sync {
    /// Identifies this criterion in evaluations.
    fn id(&self) -> &str;

    fn evaluate(&self, state: &ExecutionState) -> ContinuationEvaluation;
}

/// Stop once `step_count >= max_steps`.
#[derive(Debug, Clone, Copy)]
pub struct StepsLimit(pub usize);

impl ContinuationCriterion for StepsLimit {
    fn id(&self) -> &str {
        "steps_limit"
    }

    fn evaluate(&self, state: &ExecutionState) -> ContinuationEvaluation {
        let steps = state.step_count();
        let eval = if steps >= self.0 {
            ContinuationEvaluation::stop(
                self.id(),
                format!("Step limit reached ({steps}/{})", self.0),
                StopReason::StepsLimitReached,
            )
        } else {
            ContinuationEvaluation::proceed(self.id(), format!("{steps} of {} steps used", self.0))
        };
        eval.with_context("steps", steps).with_context("max_steps", self.0)
    }
}

/// Continue while the current step executed tools (or nothing ran yet).
///
/// A `Failure` step is not a decision: the run stays live so the driver can
/// correct itself, bounded by the step ceiling and the failure threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct StopOnFinalDecision;

impl ContinuationCriterion for StopOnFinalDecision {
    fn id(&self) -> &str {
        "stop_on_final_decision"
    }

    fn evaluate(&self, state: &ExecutionState) -> ContinuationEvaluation {
        match state.current_step().map(|s| s.step_type()) {
            None => ContinuationEvaluation::proceed(self.id(), "No step yet"),
            Some(StepType::ToolExecution) => {
                ContinuationEvaluation::proceed(self.id(), "Tools executed, awaiting next decision")
            }
            Some(StepType::Failure) => {
                ContinuationEvaluation::proceed(self.id(), "Previous step failed, retrying")
            }
            Some(step_type) => ContinuationEvaluation::stop(
                self.id(),
                format!("Final decision reached ({step_type} step)"),
                StopReason::FinalDecision,
            ),
        }
    }
}

/// Stop once `usage.total() >= max_tokens`.
#[derive(Debug, Clone, Copy)]
pub struct TokenUsageLimit(pub u64);

impl ContinuationCriterion for TokenUsageLimit {
    fn id(&self) -> &str {
        "token_usage_limit"
    }

    fn evaluate(&self, state: &ExecutionState) -> ContinuationEvaluation {
        let used = state.usage().total();
        let eval = if used >= self.0 {
            ContinuationEvaluation::stop(
                self.id(),
                format!("Token budget exhausted ({used}/{})", self.0),
                StopReason::TokenLimitReached,
            )
        } else {
            ContinuationEvaluation::proceed(self.id(), format!("{used} of {} tokens used", self.0))
        };
        eval.with_context("tokens", used).with_context("max_tokens", self.0)
    }
}

/// Stop once the time since the state started reaches the limit.
///
/// `Engine::final_step` and `Engine::iterator` restart that clock, so a
/// reloaded session gets the full limit again.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionTimeLimit(pub Duration);

impl ContinuationCriterion for ExecutionTimeLimit {
    fn id(&self) -> &str {
        "execution_time_limit"
    }

    fn evaluate(&self, state: &ExecutionState) -> ContinuationEvaluation {
        let elapsed = (Utc::now() - state.started_at())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let limit_ms = self.0.as_millis() as u64;
        let elapsed_ms = elapsed.as_millis() as u64;
        let eval = if elapsed >= self.0 {
            ContinuationEvaluation::stop(
                self.id(),
                format!("Time limit reached ({elapsed_ms}ms/{limit_ms}ms)"),
                StopReason::TimeLimitReached,
            )
        } else {
            ContinuationEvaluation::proceed(self.id(), "Within time limit")
        };
        eval.with_context("elapsed_ms", elapsed_ms)
            .with_context("limit_ms", limit_ms)
    }
}

/// Stop when the current step finished for one of the listed reasons.
#[derive(Debug, Clone)]
pub struct FinishReasonCheck(pub Vec<FinishReason>);

impl ContinuationCriterion for FinishReasonCheck {
    fn id(&self) -> &str {
        "finish_reason_check"
    }

    fn evaluate(&self, state: &ExecutionState) -> ContinuationEvaluation {
        let reason = state.current_step().and_then(|s| s.finish_reason.as_ref());
        match reason {
            Some(reason) if self.0.contains(reason) => ContinuationEvaluation::stop(
                self.id(),
                format!("Model finished with {reason:?}"),
                StopReason::FinishReasonReceived,
            ),
            _ => ContinuationEvaluation::proceed(self.id(), "No stopping finish reason"),
        }
    }
}

/// Stop once the trailing run of failed steps reaches `max`.
#[derive(Debug, Clone, Copy)]
pub struct ErrorPresenceCheck(pub usize);

impl ContinuationCriterion for ErrorPresenceCheck {
    fn id(&self) -> &str {
        "error_presence_check"
    }

    fn evaluate(&self, state: &ExecutionState) -> ContinuationEvaluation {
        let failures = state.consecutive_failures();
        let eval = if failures >= self.0 {
            ContinuationEvaluation::stop(
                self.id(),
                format!("{failures} consecutive failed steps"),
                StopReason::ErrorThreshold,
            )
        } else {
            ContinuationEvaluation::proceed(self.id(), "Error count below limit")
        };
        eval.with_context("consecutive_failures", failures)
    }
}

/// Ordered list of criteria.
#[derive(Clone, Default)]
pub struct ContinuationCriteria {
    criteria: Vec<Arc<dyn ContinuationCriterion>>,
}

impl ContinuationCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a criterion.
    pub fn with(mut self, criterion: impl ContinuationCriterion + 'static) -> Self {
        self.criteria.push(Arc::new(criterion));
        self
    }

    pub fn push(&mut self, criterion: Arc<dyn ContinuationCriterion>) {
        self.criteria.push(criterion);
    }

    /// Step ceiling and final-decision check, plus the optional token and
    /// time limits when configured.
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut criteria = Self::new()
            .with(StepsLimit(config.max_steps))
            .with(StopOnFinalDecision);
        if let Some(tokens) = config.max_total_tokens {
            criteria = criteria.with(TokenUsageLimit(tokens));
        }
        if let Some(secs) = config.time_limit_secs {
            criteria = criteria.with(ExecutionTimeLimit(Duration::from_secs(secs)));
        }
        criteria
    }

    /// Evaluate every criterion against `state` and combine the votes.
    pub fn evaluate(&self, state: &ExecutionState) -> ContinuationOutcome {
        ContinuationOutcome::from_evaluations(
            self.criteria.iter().map(|c| c.evaluate(state)).collect(),
        )
    }

    pub fn ids(&self) -> Vec<&str> {
        self.criteria.iter().map(|c| c.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.criteria.len()
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }
}

impl std::fmt::Debug for ContinuationCriteria {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContinuationCriteria")
            .field("criteria", &self.ids())
            .finish()
    }
}
