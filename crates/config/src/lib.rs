//! Configuration loading, validation, and management for Stepwise.
//!
//! Loads configuration from `~/.stepwise/config.toml` with environment
//! variable overrides. Validates all settings at load time.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.stepwise/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model call settings
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Loop limits and failure handling
    #[serde(default)]
    pub engine: EngineConfig,

    /// Context-window buffering and summarization
    #[serde(default)]
    pub buffer: BufferConfig,

    /// Tool call policy
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Command execution limits for tools that run processes
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Session persistence
    #[serde(default)]
    pub sessions: SessionsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Consume the streaming variant and assemble deltas
    #[serde(default)]
    pub streaming: bool,
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: None,
            streaming: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Hard ceiling on steps per run (safety limit)
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Failed steps in a row before the run is marked failed
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: usize,

    /// Stop once accumulated usage reaches this many tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_total_tokens: Option<u64>,

    /// Stop once the run has been going for this many seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit_secs: Option<u64>,
}

fn default_max_steps() -> usize {
    25
}
fn default_max_consecutive_failures() -> usize {
    3
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_consecutive_failures: default_max_consecutive_failures(),
            max_total_tokens: None,
            time_limit_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Token count of the conversation above which old messages move to the buffer
    #[serde(default = "default_max_active_tokens")]
    pub max_active_tokens: usize,

    /// Summarize the buffer once it holds this many tokens
    #[serde(default)]
    pub summarize: bool,

    #[serde(default = "default_max_buffer_tokens")]
    pub max_buffer_tokens: usize,

    #[serde(default = "default_max_summary_tokens")]
    pub max_summary_tokens: usize,
}

fn default_max_active_tokens() -> usize {
    4096
}
fn default_max_buffer_tokens() -> usize {
    2048
}
fn default_max_summary_tokens() -> usize {
    512
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_active_tokens: default_max_active_tokens(),
            summarize: false,
            max_buffer_tokens: default_max_buffer_tokens(),
            max_summary_tokens: default_max_summary_tokens(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// If non-empty, only these tools may run
    #[serde(default)]
    pub allowed: Vec<String>,

    /// These tools never run
    #[serde(default)]
    pub denied: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Captured stdout/stderr are truncated to this many bytes each
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// Base commands the shell tool may run. Empty = any.
    #[serde(default)]
    pub allowed_commands: Vec<String>,
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_max_output_bytes() -> usize {
    64 * 1024
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_output_bytes: default_max_output_bytes(),
            allowed_commands: vec![
                "ls".into(),
                "cat".into(),
                "echo".into(),
                "grep".into(),
                "pwd".into(),
                "wc".into(),
                "git".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// "memory" or "file"
    #[serde(default = "default_session_backend")]
    pub backend: String,

    /// Directory for the file backend; defaults to `~/.stepwise/sessions`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

fn default_session_backend() -> String {
    "file".into()
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            backend: default_session_backend(),
            dir: None,
        }
    }
}

impl SessionsConfig {
    /// The directory the file backend writes to.
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("sessions"))
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.stepwise/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `STEPWISE_MODEL`
    /// - `STEPWISE_MAX_STEPS`
    /// - `STEPWISE_SESSION_DIR`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let config = Self::load_from(&config_path)?;
        let config = config.with_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    pub fn with_env_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(model) = lookup("STEPWISE_MODEL") {
            self.inference.model = model;
        }

        if let Some(raw) = lookup("STEPWISE_MAX_STEPS") {
            self.engine.max_steps = raw.parse().map_err(|_| {
                ConfigError::ValidationError(format!("STEPWISE_MAX_STEPS is not a number: {raw}"))
            })?;
        }

        if let Some(dir) = lookup("STEPWISE_SESSION_DIR") {
            self.sessions.dir = Some(PathBuf::from(dir));
        }

        Ok(self)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".stepwise")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.inference.temperature < 0.0 || self.inference.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "inference.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.engine.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "engine.max_steps must be at least 1".into(),
            ));
        }

        if self.engine.max_consecutive_failures == 0 {
            return Err(ConfigError::ValidationError(
                "engine.max_consecutive_failures must be at least 1".into(),
            ));
        }

        if self.buffer.summarize && self.buffer.max_summary_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "buffer.max_summary_tokens must be > 0 when summarizing".into(),
            ));
        }

        if !matches!(self.sessions.backend.as_str(), "memory" | "file") {
            return Err(ConfigError::ValidationError(format!(
                "sessions.backend must be \"memory\" or \"file\", got \"{}\"",
                self.sessions.backend
            )));
        }

        if let Some(name) = self.tools.allowed.iter().find(|t| self.tools.denied.contains(t)) {
            return Err(ConfigError::ValidationError(format!(
                "tool \"{name}\" is both allowed and denied"
            )));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
