//! Built-in tools for Stepwise and the command execution backend they run on.

pub mod sandbox;
pub mod shell;

use std::sync::Arc;

use stepwise_config::AppConfig;
use stepwise_core::tool::ToolRegistry;

pub use sandbox::{CommandExecutor, CommandOutput, ExecutionPolicy, ProcessExecutor, SandboxError};
pub use shell::ShellTool;

/// Registry with every built-in tool, wired to a local process executor
/// bounded by the `sandbox` section of the configuration.
///
/// The `tools` allow/deny lists are not applied here; the engine's tool
/// policy enforces them at call time.
pub fn default_registry(config: &AppConfig) -> ToolRegistry {
    let executor: Arc<dyn CommandExecutor> =
        Arc::new(ProcessExecutor::new(ExecutionPolicy::from(&config.sandbox)));
    ToolRegistry::new().with_tool(Arc::new(ShellTool::new(
        executor,
        config.sandbox.allowed_commands.clone(),
    )))
}
