//! Errors raised inside the engine pipeline.
//!
//! None of these reach the caller of [`Engine::next_step`](crate::Engine::next_step):
//! the orchestrator hands them to the [`ErrorHandler`](crate::ErrorHandler),
//! which turns them into a `Failure` step.

use stepwise_core::{ErrorKind, ProviderError, ToolError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Inference failed: {0}")]
    Inference(#[from] ProviderError),

    #[error("Failed to extract decision: {0}")]
    DecisionExtraction(String),

    #[error("{0}")]
    Tool(#[from] ToolError),

    #[error("Processor `{processor}` failed: {message}")]
    Processor { processor: String, message: String },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn processor(processor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Processor {
            processor: processor.into(),
            message: message.into(),
        }
    }

    /// The kind recorded on the failure step.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Inference(_) => ErrorKind::Inference,
            Self::DecisionExtraction(_) => ErrorKind::DecisionExtraction,
            Self::Tool(ToolError::Blocked { .. }) => ErrorKind::ToolBlocked,
            Self::Tool(_) => ErrorKind::ToolExecution,
            Self::Processor { .. } => ErrorKind::Processor,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Serialization(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn tool_name(&self) -> Option<&str> {
        match self {
            Self::Tool(err) => err.tool_name(),
            _ => None,
        }
    }
}
