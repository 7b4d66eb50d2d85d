//! Tool execution: look up, check policy, invoke, observe.
//!
//! Nothing here fails. Every error (unknown tool, malformed arguments,
//! policy rejection, execution failure) is captured into the
//! [`ToolExecution`] record and reported back to the model as an
//! observation naming the tool and the error.

use std::collections::BTreeSet;

use chrono::Utc;
use stepwise_config::ToolsConfig;
use stepwise_core::{
    Message, MessageToolCall, StepError, ToolCall, ToolDefinition, ToolError, ToolExecution,
    ToolRegistry, ToolResult,
};
use tracing::{debug, info, warn};

/// Which tools may run.
///
/// A denied name is always blocked. A non-empty allow-list blocks every
/// name not on it. Both empty means every registered tool may run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolPolicy {
    allowed: BTreeSet<String>,
    denied: BTreeSet<String>,
}

impl ToolPolicy {
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn allow_only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: names.into_iter().map(Into::into).collect(),
            denied: BTreeSet::new(),
        }
    }

    pub fn deny<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: BTreeSet::new(),
            denied: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &ToolsConfig) -> Self {
        Self {
            allowed: config.allowed.iter().cloned().collect(),
            denied: config.denied.iter().cloned().collect(),
        }
    }

    pub fn check(&self, tool_name: &str) -> Result<(), ToolError> {
        if self.denied.contains(tool_name) {
            return Err(ToolError::Blocked {
                tool_name: tool_name.into(),
                reason: "tool is on the deny list".into(),
            });
        }
        if !self.allowed.is_empty() && !self.allowed.contains(tool_name) {
            return Err(ToolError::Blocked {
                tool_name: tool_name.into(),
                reason: format!(
                    "tool is not on the allow list ({} tools allowed)",
                    self.allowed.len()
                ),
            });
        }
        Ok(())
    }
}

/// One executed call and the text reported back to the model.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub execution: ToolExecution,
    pub observation: String,
}

impl ToolOutcome {
    /// The observation as a tool-role message answering the call.
    pub fn to_message(&self) -> Message {
        Message::tool_result(&self.execution.call.id, &self.observation)
    }

    /// Structured data the tool returned, if any.
    pub fn data(&self) -> Option<&serde_json::Value> {
        self.execution.result.as_ref().ok().and_then(|r| r.data.as_ref())
    }
}

/// Runs tool calls against a registry under a policy.
#[derive(Debug, Clone, Default)]
pub struct ToolExecutor {
    registry: ToolRegistry,
    policy: ToolPolicy,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            policy: ToolPolicy::allow_all(),
        }
    }

    pub fn with_policy(mut self, policy: ToolPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn policy(&self) -> &ToolPolicy {
        &self.policy
    }

    /// Definitions of every registered tool, in name order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }

    /// Execute a call as emitted by the model, arguments still serialized.
    pub async fn execute_raw(&self, raw: &MessageToolCall) -> ToolOutcome {
        match ToolCall::parse(raw) {
            Ok(call) => self.execute(call).await,
            Err(err) => {
                let now = Utc::now();
                let call = ToolCall::new(
                    &raw.id,
                    &raw.name,
                    serde_json::Value::String(raw.arguments.clone()),
                );
                warn!(tool = %raw.name, error = %err, "Tool arguments rejected");
                Self::failed(call, err, now)
            }
        }
    }

    pub async fn execute(&self, call: ToolCall) -> ToolOutcome {
        let started_at = Utc::now();

        if let Err(err) = self.policy.check(&call.name) {
            warn!(tool = %call.name, "Tool call blocked by policy");
            return Self::failed(call, err, started_at);
        }

        let tool = match self.registry.resolve(&call.name) {
            Ok(tool) => tool,
            Err(err) => {
                warn!(tool = %call.name, "Model requested an unknown tool");
                return Self::failed(call, err, started_at);
            }
        };

        info!(tool = %call.name, call_id = %call.id, "Executing tool");
        match tool.execute(call.arguments.clone()).await {
            Ok(result) => {
                let observation = if result.success {
                    result.output.clone()
                } else {
                    format!("Tool `{}` reported failure: {}", call.name, result.output)
                };
                debug!(tool = %call.name, success = result.success, "Tool finished");
                let result = ToolResult {
                    call_id: call.id.clone(),
                    ..result
                };
                ToolOutcome {
                    execution: ToolExecution {
                        call,
                        result: Ok(result),
                        started_at,
                        finished_at: Utc::now(),
                    },
                    observation,
                }
            }
            Err(err) => {
                let err = normalize(&call, err);
                warn!(tool = %call.name, error = %err, "Tool execution failed");
                Self::failed(call, err, started_at)
            }
        }
    }

    fn failed(call: ToolCall, err: ToolError, started_at: chrono::DateTime<Utc>) -> ToolOutcome {
        let observation = format!("Error executing tool `{}`: {err}", call.name);
        let error = StepError::from(&err).with_tool(&call.name);
        ToolOutcome {
            execution: ToolExecution {
                call,
                result: Err(error),
                started_at,
                finished_at: Utc::now(),
            },
            observation,
        }
    }
}

/// Errors a tool raises itself are reported as `ExecutionFailed` so they
/// carry the tool name and the arguments it was called with.
fn normalize(call: &ToolCall, err: ToolError) -> ToolError {
    match err {
        ToolError::ExecutionFailed { .. }
        | ToolError::Blocked { .. }
        | ToolError::Timeout { .. }
        | ToolError::NotFound(_) => err,
        other => ToolError::ExecutionFailed {
            tool_name: call.name.clone(),
            arguments: call.arguments_json(),
            reason: other.to_string(),
        },
    }
}
