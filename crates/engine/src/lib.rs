//! The Stepwise execution engine.
//!
//! One engine, parameterized by what is injected into it:
//!
//! 1. **Compile** the immutable state into a request ([`compiler`])
//! 2. **Prepare** the state with pre-processors ([`processors`])
//! 3. **Drive** one step: chat, tool dispatch, ReAct or OODA ([`drivers`])
//! 4. **Fold** the step back in with post-processors
//! 5. **Decide** whether to go on ([`continuation`], [`error_handler`])
//!
//! The loop continues until a continuation criterion votes to stop, the
//! failure threshold is reached, or the run is cancelled.

pub mod compiler;
pub mod continuation;
pub mod drivers;
pub mod error;
pub mod error_handler;
pub mod orchestrator;
pub mod processors;
pub mod summarizer;
pub mod token;

pub use compiler::{AllSections, MessageCompiler, SelectedSections};
pub use continuation::{
    ContinuationCriteria, ContinuationCriterion, ErrorPresenceCheck, ExecutionTimeLimit,
    FinishReasonCheck, StepsLimit, StopOnFinalDecision, TokenUsageLimit,
};
pub use drivers::{
    ChatDriver, InferenceOptions, OodaDriver, ReActDriver, StepDriver, ToolDispatchDriver,
    ToolExecutor, ToolPolicy,
};
pub use error::EngineError;
pub use error_handler::{ErrorContext, ErrorHandler, ErrorHandlingResult};
pub use orchestrator::{Engine, EngineBuilder};
pub use processors::{ProcessorChain, ProcessorFlow, StateProcessor};
pub use summarizer::InferenceSummarizer;
pub use tokio_util::sync::CancellationToken;
