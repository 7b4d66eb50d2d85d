//! Engine event system: decoupled observation of runs.
//!
//! The engine publishes an event whenever a step completes, a tool runs,
//! an error is captured or a run finishes. Subscribers (loggers, UIs,
//! persistence hooks) react without the engine knowing about them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::state::ExecutionStatus;
use crate::step::{ErrorKind, StepType};

/// All engine events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    /// One iteration finished and was appended to the state
    StepCompleted {
        run_id: String,
        step_number: usize,
        step_type: StepType,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        run_id: String,
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// An error was captured into a failure step
    ErrorOccurred {
        run_id: String,
        kind: ErrorKind,
        error_message: String,
        consecutive_failures: usize,
        timestamp: DateTime<Utc>,
    },

    /// The run reached a terminal status
    RunFinished {
        run_id: String,
        status: ExecutionStatus,
        steps: usize,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for engine events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<EngineEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: EngineEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<EngineEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
