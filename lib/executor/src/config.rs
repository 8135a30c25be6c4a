//! Executor configuration.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Limits and sandbox settings for node execution.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExecutorConfig {
    /// Bound on a single HTTP call.
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    /// Default bound on a command; nodes may override it.
    #[serde(default = "default_command_timeout_seconds")]
    pub command_timeout_seconds: u64,
    /// Working directory for commands. Defaults to the system temp dir.
    #[serde(default)]
    pub command_workdir: Option<PathBuf>,
    /// `PATH` exposed to commands; nothing else is inherited.
    #[serde(default = "default_command_path")]
    pub command_path: String,
    /// Characters of response body or command output kept in log entries.
    #[serde(default = "default_response_log_limit")]
    pub response_log_limit: usize,
}

fn default_http_timeout_seconds() -> u64 {
    300
}

fn default_command_timeout_seconds() -> u64 {
    300
}

fn default_command_path() -> String {
    "/usr/bin:/bin".to_string()
}

fn default_response_log_limit() -> usize {
    1000
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            http_timeout_seconds: default_http_timeout_seconds(),
            command_timeout_seconds: default_command_timeout_seconds(),
            command_workdir: None,
            command_path: default_command_path(),
            response_log_limit: default_response_log_limit(),
        }
    }
}

impl ExecutorConfig {
    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_seconds)
    }

    /// Returns the directory commands run in.
    #[must_use]
    pub fn workdir(&self) -> PathBuf {
        self.command_workdir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

/// Truncates text to `limit` characters, marking the cut with `...`.
#[must_use]
pub fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
