//! Error types for the Stepwise domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Stepwise operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Inference errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Session persistence errors ---
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool `{tool_name}` failed with arguments {arguments}: {reason}")]
    ExecutionFailed {
        tool_name: String,
        /// Serialized JSON arguments the tool was invoked with
        arguments: String,
        reason: String,
    },

    #[error("Tool `{tool_name}` execution blocked: {reason}")]
    Blocked { tool_name: String, reason: String },

    #[error("Tool `{tool_name}` timed out after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

impl ToolError {
    /// Name of the tool this error concerns, when known.
    pub fn tool_name(&self) -> Option<&str> {
        match self {
            Self::NotFound(name) => Some(name),
            Self::ExecutionFailed { tool_name, .. }
            | Self::Blocked { tool_name, .. }
            | Self::Timeout { tool_name, .. } => Some(tool_name),
            Self::InvalidArguments(_) => None,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("Session already exists: {0}")]
    AlreadyExists(String),

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Version conflict for session {session_id}: expected {expected}, stored {stored}")]
    VersionConflict {
        session_id: String,
        expected: u64,
        stored: u64,
    },

    #[error("Storage error: {0}")]
    Storage(String),
}
