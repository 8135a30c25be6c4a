//! Shell command execution.

use crate::config::{ExecutorConfig, truncate};
use crate::context::NodeOutput;
use crate::error::NodeExecutionError;
use crate::log::NodeLog;
use serde_json::json;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use taskgraph_workflow::{CommandLineConfig, ConfigurationError, NodeType};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

/// Runs CommandLine nodes through `sh -c` with a cleared environment.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    timeout: Duration,
    workdir: PathBuf,
    path: String,
    log_limit: usize,
}

impl CommandExecutor {
    #[must_use]
    pub fn new(config: &ExecutorConfig) -> Self {
        Self {
            timeout: config.command_timeout(),
            workdir: config.workdir(),
            path: config.command_path.clone(),
            log_limit: config.response_log_limit,
        }
    }

    /// Runs the command and waits for it to exit.
    ///
    /// Only `PATH` is passed through. The child is killed if the timeout
    /// elapses.
    ///
    /// # Errors
    ///
    /// Returns an error if the command is blank, cannot be started, times
    /// out, or exits non-zero.
    #[instrument(skip_all)]
    pub async fn execute(
        &self,
        config: &CommandLineConfig,
        log: &mut NodeLog,
    ) -> Result<NodeOutput, NodeExecutionError> {
        let command = config.command.trim();
        if command.is_empty() {
            return Err(ConfigurationError::MissingField {
                node_type: NodeType::CommandLine,
                field: "command",
            }
            .into());
        }
        let timeout = config
            .timeout_seconds
            .map_or(self.timeout, Duration::from_secs);

        debug!(command, timeout_secs = timeout.as_secs(), "running command");
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workdir)
            .env_clear()
            .env("PATH", &self.path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(error = %e, "command could not be started");
                log.error(
                    "command could not be started",
                    json!({ "command": command, "error": e.to_string() }),
                );
                return Err(NodeExecutionError::CommandSpawn {
                    message: e.to_string(),
                });
            }
            Err(_) => {
                log.error(
                    format!("command timed out after {}s", timeout.as_secs()),
                    json!({ "command": command }),
                );
                return Err(NodeExecutionError::Timeout {
                    seconds: timeout.as_secs(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let exit_code = output.status.code();
        let details = json!({
            "command": command,
            "exitCode": exit_code,
            "stdout": truncate(&stdout, self.log_limit),
            "stderr": truncate(&stderr, self.log_limit),
        });

        if !output.status.success() {
            log.error(
                format!("command exited with {}", describe_exit(exit_code)),
                details,
            );
            return Err(NodeExecutionError::CommandFailed { exit_code });
        }

        log.info("command finished", details);
        Ok(NodeOutput::value(json!({
            "exitCode": exit_code,
            "stdout": stdout,
            "stderr": stderr,
        })))
    }
}

fn describe_exit(code: Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| format!("code {c}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> CommandExecutor {
        CommandExecutor::new(&ExecutorConfig::default())
    }

    fn command(text: &str) -> CommandLineConfig {
        CommandLineConfig {
            command: text.to_string(),
            timeout_seconds: None,
        }
    }

    #[tokio::test]
    async fn captures_stdout() {
        let mut log = NodeLog::new();
        let output = executor()
            .execute(&command("echo hello"), &mut log)
            .await
            .unwrap();

        assert_eq!(output.value["exitCode"], 0);
        assert_eq!(output.value["stdout"], "hello\n");
        assert_eq!(log.lines()[0].details.as_ref().unwrap()["command"], "echo hello");
    }

    #[tokio::test]
    async fn non_zero_exit_fails() {
        let mut log = NodeLog::new();
        let result = executor().execute(&command("exit 3"), &mut log).await;

        assert_eq!(
            result,
            Err(NodeExecutionError::CommandFailed { exit_code: Some(3) })
        );
        assert_eq!(log.lines()[0].details.as_ref().unwrap()["exitCode"], 3);
    }

    #[tokio::test]
    async fn node_timeout_overrides_default() {
        let mut log = NodeLog::new();
        let config = CommandLineConfig {
            command: "sleep 5".to_string(),
            timeout_seconds: Some(1),
        };
        let result = executor().execute(&config, &mut log).await;

        assert_eq!(result, Err(NodeExecutionError::Timeout { seconds: 1 }));
    }

    #[tokio::test]
    async fn environment_is_cleared() {
        let mut log = NodeLog::new();
        let result = executor()
            .execute(&command(r#"test -z "$HOME""#), &mut log)
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn blank_command_is_rejected() {
        let mut log = NodeLog::new();
        let result = executor().execute(&command("   "), &mut log).await;
        assert!(matches!(result, Err(NodeExecutionError::Configuration(_))));
    }
}
