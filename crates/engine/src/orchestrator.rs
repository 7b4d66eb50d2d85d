//! The engine: composes driver, processors, continuation policy and error
//! handler into one iteration.
//!
//! ```text
//! next_step(state)
//!   ├─ pre-processors             (raced against cancellation)
//!   ├─ driver.make_next_step      (raced against cancellation)
//!   ├─ append step
//!   ├─ post-processors            (raced against cancellation)
//!   ├─ failure threshold / continuation criteria
//!   └─ new state with status and outcome attached
//! ```
//!
//! `next_step` never fails: whatever goes wrong below it ends up as a
//! `Failure` step on the returned state.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, Stream};
use stepwise_config::AppConfig;
use stepwise_core::{
    ContinuationEvaluation, ContinuationOutcome, EngineEvent, ErrorKind, EventBus, ExecutionState,
    ExecutionStatus, Step, StepError, StopReason, Summarizer,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::continuation::{ContinuationCriteria, ContinuationCriterion};
use crate::drivers::StepDriver;
use crate::error::EngineError;
use crate::error_handler::ErrorHandler;
use crate::processors::{
    AppendStepMessages, MergeStepMetadata, MoveMessagesToBuffer, ProcessorChain, StateProcessor,
    SummarizeBuffer,
};

pub struct Engine {
    driver: Arc<dyn StepDriver>,
    criteria: ContinuationCriteria,
    pre_processors: ProcessorChain,
    post_processors: ProcessorChain,
    error_handler: ErrorHandler,
    events: Option<Arc<EventBus>>,
    cancellation: CancellationToken,
}

impl Engine {
    pub fn builder(driver: Arc<dyn StepDriver>) -> EngineBuilder {
        EngineBuilder::new(driver)
    }

    pub fn criteria(&self) -> &ContinuationCriteria {
        &self.criteria
    }

    /// A handle that cancels this engine's runs.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Whether another iteration should run.
    pub fn has_next_step(&self, state: &ExecutionState) -> bool {
        state.status() == ExecutionStatus::InProgress && self.criteria.evaluate(state).should_continue()
    }

    /// Run one iteration.
    ///
    /// A state that is already finished is returned unchanged.
    pub async fn next_step(&self, state: ExecutionState) -> ExecutionState {
        if state.status().is_terminal() {
            debug!(run_id = %state.id(), status = %state.status(), "Run already finished");
            return state;
        }
        if self.cancellation.is_cancelled() {
            return self.cancelled(state);
        }

        let started = Instant::now();
        let step_number = state.step_count() + 1;
        debug!(run_id = %state.id(), step = step_number, driver = self.driver.name(), "Starting step");

        let pre_processed = tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => return self.cancelled(state),
            pre_processed = self.pre_processors.run(&state) => pre_processed,
        };
        let prepared = match pre_processed {
            Ok(prepared) => prepared,
            Err(err) => return self.recover(state, err, started),
        };

        let produced = tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => return self.cancelled(prepared),
            produced = self.driver.make_next_step(&prepared) => produced,
        };
        let step = match produced {
            Ok(step) => step.with_completed_at(Utc::now()),
            Err(err) => return self.recover(prepared, err, started),
        };

        let appended = prepared.with_added_step(step);
        let post_processed = tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => return self.cancelled(appended),
            post_processed = self.post_processors.run(&appended) => post_processed,
        };
        let processed = match post_processed {
            Ok(processed) => processed,
            Err(err) => {
                warn!(run_id = %appended.id(), error = %err, "Post-processing failed");
                let error = StepError::new(ErrorKind::Processor, err.to_string());
                let step = appended
                    .current_step()
                    .cloned()
                    .map(|s| s.with_error(error));
                match step {
                    Some(step) => appended.with_current_step(step),
                    None => appended,
                }
            }
        };

        self.conclude(processed, started)
    }

    /// Iterate until [`has_next_step`](Self::has_next_step) says stop.
    pub async fn final_step(&self, state: ExecutionState) -> ExecutionState {
        let mut state = state.with_started_at(Utc::now());
        while self.has_next_step(&state) {
            state = self.next_step(state).await;
        }
        state
    }

    /// Every intermediate state of a run starting from `seed`.
    ///
    /// Each call starts a fresh run from the seed.
    pub fn iterator(&self, seed: ExecutionState) -> impl Stream<Item = ExecutionState> + '_ {
        stream::unfold(Some(seed.with_started_at(Utc::now())), move |state| async move {
            let state = state?;
            if !self.has_next_step(&state) {
                return None;
            }
            let next = self.next_step(state).await;
            Some((next.clone(), Some(next)))
        })
    }

    /// Turn an error raised before a step existed into a failure step.
    fn recover(&self, state: ExecutionState, err: EngineError, started: Instant) -> ExecutionState {
        warn!(run_id = %state.id(), error = %err, "Step failed");
        let result = self.error_handler.handle(err, &state);
        let state = state.with_added_step(result.step.with_completed_at(Utc::now()));

        if result.final_status == ExecutionStatus::Failed {
            return self.finish(state, result.outcome, ExecutionStatus::Failed, started);
        }
        let outcome = self.criteria.evaluate(&state);
        self.finish(state, outcome, ExecutionStatus::InProgress, started)
    }

    /// Decide status and outcome for a state whose newest step was just added.
    fn conclude(&self, state: ExecutionState, started: Instant) -> ExecutionState {
        if let Some(outcome) = self.error_handler.assess(&state) {
            return self.finish(state, outcome, ExecutionStatus::Failed, started);
        }

        let outcome = self.criteria.evaluate(&state);
        let failed = state.current_step().is_some_and(Step::has_errors);
        let status = if failed || outcome.should_continue() {
            ExecutionStatus::InProgress
        } else {
            ExecutionStatus::Completed
        };
        self.finish(state, outcome, status, started)
    }

    fn cancelled(&self, state: ExecutionState) -> ExecutionState {
        info!(run_id = %state.id(), step = state.step_count() + 1, "Run cancelled");
        let step = Step::failure(
            state.messages().to_vec(),
            StepError::new(ErrorKind::Cancelled, EngineError::Cancelled.to_string()),
        )
        .with_completed_at(Utc::now());
        let outcome = ContinuationOutcome::forced_stop(ContinuationEvaluation::stop(
            "cancellation",
            "Cancellation requested",
            StopReason::Cancelled,
        ));
        let state = state.with_added_step(step);
        self.finish(state, outcome, ExecutionStatus::Cancelled, Instant::now())
    }

    /// Attach the outcome to the current step, set the status, and report.
    fn finish(
        &self,
        state: ExecutionState,
        outcome: ContinuationOutcome,
        status: ExecutionStatus,
        started: Instant,
    ) -> ExecutionState {
        let stop_reason = outcome.stop_reason.clone();
        let state = match state.current_step().cloned() {
            Some(step) => state.with_current_step(step.with_outcome(outcome)),
            None => state,
        };
        let state = state.with_status(status);
        let duration_ms = started.elapsed().as_millis() as u64;

        if let Some(step) = state.current_step() {
            if step.has_errors() {
                warn!(
                    run_id = %state.id(),
                    step = state.step_count(),
                    step_type = %step.step_type(),
                    consecutive_failures = state.consecutive_failures(),
                    errors = %step.errors_as_string(),
                    "Step recorded errors"
                );
            } else {
                info!(
                    run_id = %state.id(),
                    step = state.step_count(),
                    step_type = %step.step_type(),
                    duration_ms,
                    "Step completed"
                );
            }
            self.publish_step(&state, step, duration_ms);
        }

        if status.is_terminal() {
            info!(
                run_id = %state.id(),
                status = %status,
                steps = state.step_count(),
                reason = %stop_reason.as_ref().map(|r| r.to_string()).unwrap_or_default(),
                tokens = state.usage().total(),
                "Run finished"
            );
            self.publish(EngineEvent::RunFinished {
                run_id: state.id().to_string(),
                status,
                steps: state.step_count(),
                timestamp: Utc::now(),
            });
        }
        state
    }

    fn publish_step(&self, state: &ExecutionState, step: &Step, duration_ms: u64) {
        if self.events.is_none() {
            return;
        }
        let run_id = state.id().to_string();
        for execution in &step.tool_executions {
            self.publish(EngineEvent::ToolExecuted {
                run_id: run_id.clone(),
                tool_name: execution.call.name.clone(),
                success: !execution.is_error(),
                duration_ms: execution.duration_ms(),
                timestamp: Utc::now(),
            });
        }
        if let Some(error) = step.errors.first() {
            self.publish(EngineEvent::ErrorOccurred {
                run_id: run_id.clone(),
                kind: error.kind,
                error_message: step.errors_as_string(),
                consecutive_failures: state.consecutive_failures(),
                timestamp: Utc::now(),
            });
        }
        self.publish(EngineEvent::StepCompleted {
            run_id,
            step_number: state.step_count(),
            step_type: step.step_type(),
            duration_ms,
            timestamp: Utc::now(),
        });
    }

    fn publish(&self, event: EngineEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("driver", &self.driver.name())
            .field("criteria", &self.criteria)
            .field("pre_processors", &self.pre_processors)
            .field("post_processors", &self.post_processors)
            .field("error_handler", &self.error_handler)
            .finish()
    }
}

/// Assembles an [`Engine`].
///
/// Defaults: the criteria and failure threshold of `EngineConfig::default()`,
/// no pre-processors, and [`AppendStepMessages`] followed by
/// [`MergeStepMetadata`] as post-processors.
pub struct EngineBuilder {
    driver: Arc<dyn StepDriver>,
    criteria: ContinuationCriteria,
    pre_processors: ProcessorChain,
    post_processors: ProcessorChain,
    error_handler: ErrorHandler,
    events: Option<Arc<EventBus>>,
    cancellation: CancellationToken,
}

impl EngineBuilder {
    pub fn new(driver: Arc<dyn StepDriver>) -> Self {
        let config = AppConfig::default();
        Self {
            driver,
            criteria: ContinuationCriteria::from_config(&config.engine),
            pre_processors: ProcessorChain::new(),
            post_processors: ProcessorChain::new()
                .with(AppendStepMessages)
                .with(MergeStepMetadata),
            error_handler: ErrorHandler::new(config.engine.max_consecutive_failures),
            events: None,
            cancellation: CancellationToken::new(),
        }
    }

    /// Criteria, failure threshold and buffering from configuration. The
    /// summarizing processor is only installed when a summarizer is given.
    pub fn from_config(
        driver: Arc<dyn StepDriver>,
        config: &AppConfig,
        summarizer: Option<Arc<dyn Summarizer>>,
    ) -> Self {
        let mut builder = Self::new(driver)
            .with_criteria(ContinuationCriteria::from_config(&config.engine))
            .with_error_handler(ErrorHandler::new(config.engine.max_consecutive_failures));

        let buffer = &config.buffer;
        if buffer.enabled {
            builder = builder.with_pre_processor(MoveMessagesToBuffer::new(buffer.max_active_tokens));
            if let (true, Some(summarizer)) = (buffer.summarize, summarizer) {
                builder = builder.with_pre_processor(SummarizeBuffer::new(
                    summarizer,
                    buffer.max_buffer_tokens,
                    buffer.max_summary_tokens,
                ));
            }
        }
        builder
    }

    /// Replace the continuation criteria.
    pub fn with_criteria(mut self, criteria: ContinuationCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    /// Append one criterion.
    pub fn with_criterion(mut self, criterion: impl ContinuationCriterion + 'static) -> Self {
        self.criteria = self.criteria.with(criterion);
        self
    }

    pub fn with_pre_processor(mut self, processor: impl StateProcessor + 'static) -> Self {
        self.pre_processors = self.pre_processors.with(processor);
        self
    }

    /// Append a post-processor after the default ones.
    pub fn with_post_processor(mut self, processor: impl StateProcessor + 'static) -> Self {
        self.post_processors = self.post_processors.with(processor);
        self
    }

    /// Replace the post-processors, defaults included.
    pub fn with_post_processors(mut self, chain: ProcessorChain) -> Self {
        self.post_processors = chain;
        self
    }

    pub fn with_error_handler(mut self, handler: ErrorHandler) -> Self {
        self.error_handler = handler;
        self
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            driver: self.driver,
            criteria: self.criteria,
            pre_processors: self.pre_processors,
            post_processors: self.post_processors,
            error_handler: self.error_handler,
            events: self.events,
            cancellation: self.cancellation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::continuation::StepsLimit;
    use crate::drivers::test_helpers::{text_response, ScriptedInference};
    use crate::drivers::{ChatDriver, InferenceOptions};
    use crate::processors::ProcessorFlow;
    use async_trait::async_trait;
    use futures::StreamExt;
    use stepwise_core::{Message, StepType};

    fn chat(replies: &[&str]) -> Arc<dyn StepDriver> {
        let inference = Arc::new(ScriptedInference::replying(
            replies.iter().map(|r| text_response(r)).collect(),
        ));
        Arc::new(ChatDriver::new(inference, InferenceOptions::new("m")))
    }

    /// Never finishes; only cancellation ends it.
    struct Stalled;

    #[async_trait]
    impl StepDriver for Stalled {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn make_next_step(&self, _state: &ExecutionState) -> Result<Step, EngineError> {
            std::future::pending().await
        }
    }

    /// A pre-processor that never returns.
    struct StalledPre;

    #[async_trait]
    impl StateProcessor for StalledPre {
        fn name(&self) -> &str {
            "stalled_pre"
        }

        async fn process(&self, _state: &ExecutionState) -> Result<ProcessorFlow, EngineError> {
            std::future::pending().await
        }
    }

    struct BrokenPost;

    #[async_trait]
    impl StateProcessor for BrokenPost {
        fn name(&self) -> &str {
            "broken_post"
        }

        async fn process(&self, _state: &ExecutionState) -> Result<ProcessorFlow, EngineError> {
            Err(EngineError::processor("broken_post", "disk full"))
        }
    }

    #[tokio::test]
    async fn finished_state_is_returned_unchanged() {
        let engine = Engine::builder(chat(&[])).build();
        let done = ExecutionState::new().with_status(ExecutionStatus::Completed);
        let out = engine.next_step(done).await;
        assert_eq!(out.step_count(), 0);
        assert_eq!(out.status(), ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn outcome_is_attached_to_the_step() {
        let engine = Engine::builder(chat(&["Hi!"])).build();
        let out = engine
            .next_step(ExecutionState::from_messages(vec![Message::user("Hello")]))
            .await;
        let step = out.current_step().unwrap();
        let outcome = step.outcome.as_ref().unwrap();
        assert_eq!(outcome.stop_reason, Some(StopReason::FinalDecision));
        assert!(step.completed_at.is_some());
        assert_eq!(out.status(), ExecutionStatus::Completed);
        // AppendStepMessages ran
        assert_eq!(out.messages().len(), 2);
    }

    #[tokio::test]
    async fn cancellation_before_start() {
        let engine = Engine::builder(chat(&[])).build();
        engine.cancel();
        let out = engine.next_step(ExecutionState::new()).await;
        assert_eq!(out.status(), ExecutionStatus::Cancelled);
        assert_eq!(out.step_count(), 1);
        assert_eq!(out.current_step().unwrap().errors[0].kind, ErrorKind::Cancelled);
        assert!(!engine.has_next_step(&out));
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_running_driver() {
        let token = CancellationToken::new();
        let engine = Engine::builder(Arc::new(Stalled))
            .with_cancellation(token.clone())
            .build();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            token.cancel();
        });
        let out = engine.next_step(ExecutionState::new()).await;
        canceller.await.unwrap();

        assert_eq!(out.status(), ExecutionStatus::Cancelled);
        let step = out.current_step().unwrap();
        assert_eq!(step.step_type(), StepType::Failure);
        assert_eq!(
            step.outcome.as_ref().unwrap().stop_reason,
            Some(StopReason::Cancelled)
        );
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_running_pre_processor() {
        let token = CancellationToken::new();
        let engine = Engine::builder(chat(&["never sent"]))
            .with_pre_processor(StalledPre)
            .with_cancellation(token.clone())
            .build();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            token.cancel();
        });
        let out = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            engine.next_step(ExecutionState::from_messages(vec![Message::user("Hello")])),
        )
        .await
        .expect("next_step ignored cancellation");
        canceller.await.unwrap();

        assert_eq!(out.status(), ExecutionStatus::Cancelled);
        assert_eq!(out.step_count(), 1);
        assert_eq!(out.current_step().unwrap().errors[0].kind, ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn post_processor_error_is_attached_to_the_step() {
        let engine = Engine::builder(chat(&["Hi!"]))
            .with_criteria(ContinuationCriteria::new().with(StepsLimit(5)))
            .with_post_processor(BrokenPost)
            .build();
        let out = engine
            .next_step(ExecutionState::from_messages(vec![Message::user("Hello")]))
            .await;
        let step = out.current_step().unwrap();
        assert_eq!(step.step_type(), StepType::Final);
        assert!(step.errors_as_string().contains("disk full"));
        assert_eq!(out.status(), ExecutionStatus::InProgress);
        assert_eq!(out.consecutive_failures(), 1);
    }

    #[tokio::test]
    async fn events_are_published() {
        let events = Arc::new(EventBus::new(16));
        let mut rx = events.subscribe();
        let engine = Engine::builder(chat(&["Hi!"]))
            .with_event_bus(events.clone())
            .build();
        engine
            .final_step(ExecutionState::from_messages(vec![Message::user("Hello")]))
            .await;

        let first = rx.recv().await.unwrap();
        assert!(matches!(
            first.as_ref(),
            EngineEvent::StepCompleted { step_number: 1, step_type: StepType::Final, .. }
        ));
        let second = rx.recv().await.unwrap();
        assert!(matches!(
            second.as_ref(),
            EngineEvent::RunFinished { status: ExecutionStatus::Completed, steps: 1, .. }
        ));
    }

    #[tokio::test]
    async fn iterator_yields_every_state() {
        let engine = Engine::builder(chat(&["a", "b", "c"]))
            .with_criteria(ContinuationCriteria::new().with(StepsLimit(3)))
            .build();
        let states: Vec<_> = engine.iterator(ExecutionState::new()).collect().await;
        let counts: Vec<_> = states.iter().map(|s| s.step_count()).collect();
        assert_eq!(counts, vec![1, 2, 3]);
        assert_eq!(states[0].current_step().unwrap().output_text(), "a");
        assert_eq!(states[2].status(), ExecutionStatus::Completed);
    }
}
