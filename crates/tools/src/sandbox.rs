//! Command execution backend for tools.
//!
//! Tools never spawn processes themselves; they go through a
//! [`CommandExecutor`], which applies the timeout and output caps of its
//! [`ExecutionPolicy`]. [`ProcessExecutor`] runs commands as local child
//! processes without a shell in between.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stepwise_config::SandboxConfig;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tracing::{debug, warn};

#[derive(Debug, Clone, Error)]
pub enum SandboxError {
    #[error("Empty command")]
    EmptyCommand,

    #[error("Failed to start `{program}`: {reason}")]
    Spawn { program: String, reason: String },

    #[error("Command `{program}` timed out after {timeout_secs}s")]
    Timeout { program: String, timeout_secs: u64 },

    #[error("I/O error: {0}")]
    Io(String),
}

/// Limits applied to every command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPolicy {
    pub timeout: Duration,
    /// Per stream, in bytes
    pub max_output_bytes: usize,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self::from(&SandboxConfig::default())
    }
}

impl From<&SandboxConfig> for ExecutionPolicy {
    fn from(config: &SandboxConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            max_output_bytes: config.max_output_bytes,
        }
    }
}

/// Captured result of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    /// Set when either stream was cut at the output cap
    #[serde(default)]
    pub truncated: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    fn policy(&self) -> &ExecutionPolicy;

    /// Run `argv[0]` with the remaining arguments, feeding `stdin` if given.
    async fn execute(&self, argv: &[String], stdin: Option<&str>) -> Result<CommandOutput, SandboxError>;
}

/// Runs commands as local child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    policy: ExecutionPolicy,
}

impl ProcessExecutor {
    pub fn new(policy: ExecutionPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    async fn execute(&self, argv: &[String], stdin: Option<&str>) -> Result<CommandOutput, SandboxError> {
        let (program, args) = argv.split_first().ok_or(SandboxError::EmptyCommand)?;
        debug!(program = %program, args = args.len(), "Spawning command");

        let mut child = Command::new(program)
            .args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::Spawn {
                program: program.clone(),
                reason: e.to_string(),
            })?;

        let input_pipe = child.stdin.take();
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let limit = self.policy.max_output_bytes;

        // Feeding stdin, draining both streams and reaping the child all run
        // under the one deadline. On timeout the child is dropped and killed.
        let run = async {
            let (fed, out, err) = tokio::join!(
                feed(input_pipe, stdin),
                read_capped(stdout_pipe, limit),
                read_capped(stderr_pipe, limit),
            );
            fed?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, out?, err?))
        };
        let (status, (out, over_out), (err, over_err)) = tokio::time::timeout(self.policy.timeout, run)
            .await
            .map_err(|_| {
                warn!(program = %program, "Command timed out");
                SandboxError::Timeout {
                    program: program.clone(),
                    timeout_secs: self.policy.timeout.as_secs(),
                }
            })?
            .map_err(|e| SandboxError::Io(e.to_string()))?;

        let (stdout, cut_out) = truncate(&out, limit);
        let (stderr, cut_err) = truncate(&err, limit);
        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code: status.code(),
            truncated: over_out || over_err || cut_out || cut_err,
        })
    }
}

/// Write `input` and close the pipe. A child that exits without reading
/// its input is not an error.
async fn feed(pipe: Option<ChildStdin>, input: Option<&str>) -> std::io::Result<()> {
    let (Some(mut pipe), Some(input)) = (pipe, input) else {
        return Ok(());
    };
    match pipe.write_all(input.as_bytes()).await {
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        other => other,
    }
}

/// Keep at most `max + 1` bytes of a stream and discard the rest, so the
/// child never blocks on a full pipe.
async fn read_capped<R: AsyncRead + Unpin>(pipe: Option<R>, max: usize) -> std::io::Result<(Vec<u8>, bool)> {
    let Some(mut pipe) = pipe else {
        return Ok((Vec::new(), false));
    };
    let mut buf = Vec::new();
    (&mut pipe).take(max as u64 + 1).read_to_end(&mut buf).await?;
    let over = buf.len() > max;
    if over {
        tokio::io::copy(&mut pipe, &mut tokio::io::sink()).await?;
    }
    Ok((buf, over))
}

fn truncate(bytes: &[u8], max: usize) -> (String, bool) {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= max {
        return (text.into_owned(), false);
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    (text[..cut].to_string(), true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let (text, cut) = truncate("héllo".as_bytes(), 2);
        assert_eq!(text, "h");
        assert!(cut);

        let (text, cut) = truncate(b"ok", 10);
        assert_eq!(text, "ok");
        assert!(!cut);
    }

    #[test]
    fn policy_from_config() {
        let config = SandboxConfig {
            timeout_secs: 5,
            max_output_bytes: 100,
            allowed_commands: vec![],
        };
        let policy = ExecutionPolicy::from(&config);
        assert_eq!(policy.timeout, Duration::from_secs(5));
        assert_eq!(policy.max_output_bytes, 100);
    }

    #[tokio::test]
    async fn empty_argv_is_rejected() {
        let err = ProcessExecutor::default().execute(&[], None).await.unwrap_err();
        assert!(matches!(err, SandboxError::EmptyCommand));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let output = ProcessExecutor::default()
            .execute(&argv(&["echo", "hello"]), None)
            .await
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn feeds_stdin() {
        let output = ProcessExecutor::default()
            .execute(&argv(&["cat"]), Some("piped in"))
            .await
            .unwrap();
        assert_eq!(output.stdout, "piped in");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn caps_output() {
        let executor = ProcessExecutor::new(ExecutionPolicy {
            timeout: Duration::from_secs(5),
            max_output_bytes: 4,
        });
        let output = executor
            .execute(&argv(&["echo", "abcdefgh"]), None)
            .await
            .unwrap();
        assert_eq!(output.stdout, "abcd");
        assert!(output.truncated);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_command_times_out() {
        let executor = ProcessExecutor::new(ExecutionPolicy {
            timeout: Duration::from_millis(100),
            max_output_bytes: 1024,
        });
        let err = executor
            .execute(&argv(&["sleep", "5"]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Timeout { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unread_stdin_does_not_outlive_the_timeout() {
        let executor = ProcessExecutor::new(ExecutionPolicy {
            timeout: Duration::from_millis(100),
            max_output_bytes: 1024,
        });
        let input = "x".repeat(4 * 1024 * 1024);
        let started = std::time::Instant::now();
        let err = executor
            .execute(&argv(&["sleep", "3"]), Some(input.as_str()))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Timeout { .. }), "got {err:?}");
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn large_echo_through_stdin_is_capped_without_deadlock() {
        let executor = ProcessExecutor::new(ExecutionPolicy {
            timeout: Duration::from_secs(5),
            max_output_bytes: 16,
        });
        let input = "y".repeat(1024 * 1024);
        let output = executor
            .execute(&argv(&["cat"]), Some(input.as_str()))
            .await
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "y".repeat(16));
        assert!(output.truncated);
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let err = ProcessExecutor::default()
            .execute(&argv(&["definitely-not-a-real-program-xyz"]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Spawn { .. }));
    }
}
