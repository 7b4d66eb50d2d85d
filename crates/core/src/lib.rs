//! # Stepwise Core
//!
//! Domain types, collaborator traits, and error definitions for the Stepwise
//! execution engine. This crate has **no engine logic**: it defines the
//! values the engine threads through its loop (state, steps, continuation
//! votes, sessions) and the traits its collaborators implement (inference,
//! tools, summarizer, session stores).
//!
//! ## Design Philosophy
//!
//! Every collaborator is a trait here. Implementations live in their
//! respective crates, which keeps the dependency graph pointing inward and
//! makes every part of the loop testable with scripted stand-ins.

pub mod continuation;
pub mod error;
pub mod event;
pub mod inference;
pub mod message;
pub mod session;
pub mod state;
pub mod step;
pub mod tool;
pub mod usage;

// Re-export key types at crate root for ergonomics
pub use continuation::{ContinuationDecision, ContinuationEvaluation, ContinuationOutcome, StopReason};
pub use error::{Error, ProviderError, Result, SessionError, ToolError};
pub use event::{EngineEvent, EventBus};
pub use inference::{
    FinishReason, Inference, InferenceRequest, InferenceResponse, ResponseFormat, StreamChunk,
    Summarizer, ToolCallDelta, ToolDefinition,
};
pub use message::{Message, MessageToolCall, Role};
pub use session::{Session, SessionId, SessionStore};
pub use state::{CachedContext, ExecutionState, ExecutionStatus, MessageStore, Section};
pub use step::{ErrorKind, Step, StepError, StepType, ToolExecution};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult};
pub use usage::Usage;
