//! Continuation votes and their aggregate.
//!
//! Criteria live in the engine crate; the values they produce live here so
//! steps and persisted sessions can carry them.

use serde::{Deserialize, Serialize};

/// A single criterion's vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuationDecision {
    AllowContinuation,
    AllowStop,
}

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    StepsLimitReached,
    TokenLimitReached,
    TimeLimitReached,
    FinalDecision,
    FinishReasonReceived,
    ErrorThreshold,
    Cancelled,
    Custom(String),
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StepsLimitReached => f.write_str("steps limit reached"),
            Self::TokenLimitReached => f.write_str("token limit reached"),
            Self::TimeLimitReached => f.write_str("time limit reached"),
            Self::FinalDecision => f.write_str("final decision reached"),
            Self::FinishReasonReceived => f.write_str("finish reason received"),
            Self::ErrorThreshold => f.write_str("consecutive failure threshold reached"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Custom(reason) => f.write_str(reason),
        }
    }
}

/// The result of evaluating one criterion against a state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuationEvaluation {
    /// Identifies the criterion that produced this vote
    pub criterion: String,
    pub decision: ContinuationDecision,
    /// Human-readable explanation
    pub reason: String,
    /// Structured diagnostics (counters, limits)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub context: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
}

impl ContinuationEvaluation {
    pub fn proceed(criterion: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            criterion: criterion.into(),
            decision: ContinuationDecision::AllowContinuation,
            reason: reason.into(),
            context: serde_json::Map::new(),
            stop_reason: None,
        }
    }

    pub fn stop(
        criterion: impl Into<String>,
        reason: impl Into<String>,
        stop_reason: StopReason,
    ) -> Self {
        Self {
            criterion: criterion.into(),
            decision: ContinuationDecision::AllowStop,
            reason: reason.into(),
            context: serde_json::Map::new(),
            stop_reason: Some(stop_reason),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn is_stop(&self) -> bool {
        self.decision == ContinuationDecision::AllowStop
    }
}

/// Aggregate decision over every criterion's vote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuationOutcome {
    pub decision: ContinuationDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    /// Every vote, in criteria order
    #[serde(default)]
    pub evaluations: Vec<ContinuationEvaluation>,
}

impl ContinuationOutcome {
    /// Combine votes: any stop vote stops, and the first stop vote in list
    /// order supplies the stop reason. No votes means continue.
    pub fn from_evaluations(evaluations: Vec<ContinuationEvaluation>) -> Self {
        let first_stop = evaluations.iter().find(|e| e.is_stop());
        let (decision, stop_reason) = match first_stop {
            Some(eval) => (
                ContinuationDecision::AllowStop,
                Some(
                    eval.stop_reason
                        .clone()
                        .unwrap_or_else(|| StopReason::Custom(eval.reason.clone())),
                ),
            ),
            None => (ContinuationDecision::AllowContinuation, None),
        };
        Self {
            decision,
            stop_reason,
            evaluations,
        }
    }

    /// An outcome that stops regardless of any criterion.
    pub fn forced_stop(evaluation: ContinuationEvaluation) -> Self {
        Self::from_evaluations(vec![evaluation])
    }

    pub fn should_continue(&self) -> bool {
        self.decision == ContinuationDecision::AllowContinuation
    }

    /// The first vetoing evaluation, if any.
    pub fn deciding_evaluation(&self) -> Option<&ContinuationEvaluation> {
        self.evaluations.iter().find(|e| e.is_stop())
    }
}
