//! Shell tool: run an allow-listed command through a [`CommandExecutor`].
//!
//! The command line is split on whitespace and executed directly; there is
//! no shell, so pipes, redirects and `;` chaining are not interpreted.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use stepwise_core::error::ToolError;
use stepwise_core::tool::{Tool, ToolResult};
use tracing::{debug, warn};

use crate::sandbox::{CommandExecutor, SandboxError};

const NAME: &str = "shell";

pub struct ShellTool {
    executor: Arc<dyn CommandExecutor>,
    /// If non-empty, only these base commands may run.
    allowed_commands: Vec<String>,
}

impl ShellTool {
    pub fn new(executor: Arc<dyn CommandExecutor>, allowed_commands: Vec<String>) -> Self {
        Self {
            executor,
            allowed_commands,
        }
    }

    fn is_command_allowed(&self, program: &str) -> bool {
        self.allowed_commands.is_empty() || self.allowed_commands.iter().any(|a| a == program)
    }

    fn failed(arguments: &serde_json::Value, reason: impl Into<String>) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: NAME.into(),
            arguments: arguments.to_string(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Run a command and return its stdout/stderr. Only allow-listed programs are available; \
         shell syntax such as pipes and redirects is not supported."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The command line to execute, e.g. \"ls -la src\""
                },
                "stdin": {
                    "type": "string",
                    "description": "Optional text fed to the command's standard input"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let command = arguments["command"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'command' argument".into()))?;
        let argv: Vec<String> = command.split_whitespace().map(str::to_string).collect();
        let Some(program) = argv.first() else {
            return Err(ToolError::InvalidArguments("Empty 'command' argument".into()));
        };

        if !self.is_command_allowed(program) {
            return Err(ToolError::Blocked {
                tool_name: NAME.into(),
                reason: format!("Command '{program}' not in allowlist"),
            });
        }

        debug!(command = %command, "Executing shell command");
        let output = self
            .executor
            .execute(&argv, arguments["stdin"].as_str())
            .await
            .map_err(|e| match e {
                SandboxError::Timeout { timeout_secs, .. } => ToolError::Timeout {
                    tool_name: NAME.into(),
                    timeout_secs,
                },
                other => Self::failed(&arguments, other.to_string()),
            })?;

        let success = output.success();
        let mut text = if success {
            if output.stderr.is_empty() {
                output.stdout.clone()
            } else {
                format!("{}\n[stderr]: {}", output.stdout, output.stderr)
            }
        } else {
            let code = output.exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string());
            warn!(command = %command, exit_code = %code, "Command failed");
            format!("[exit code: {code}]\n{}\n{}", output.stdout, output.stderr)
        };
        if output.truncated {
            text.push_str("\n[output truncated]");
        }

        Ok(ToolResult {
            call_id: String::new(),
            success,
            output: text.trim().to_string(),
            data: Some(json!({
                "exit_code": output.exit_code,
                "truncated": output.truncated,
            })),
        })
    }
}
