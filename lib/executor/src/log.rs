//! Log entries produced while a node runs.

use serde_json::Value as JsonValue;
use taskgraph_core::WorkflowRunId;
use taskgraph_workflow::{LogEntry, LogLevel, Node};

/// A log line before it is attached to a run.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeLogLine {
    pub level: LogLevel,
    pub message: String,
    pub details: Option<JsonValue>,
}

/// Collects log lines for one node execution.
#[derive(Debug, Clone, Default)]
pub struct NodeLog {
    lines: Vec<NodeLogLine>,
}

impl NodeLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, level: LogLevel, message: impl Into<String>, details: Option<JsonValue>) {
        self.lines.push(NodeLogLine {
            level,
            message: message.into(),
            details,
        });
    }

    pub fn info(&mut self, message: impl Into<String>, details: JsonValue) {
        self.push(LogLevel::Info, message, Some(details));
    }

    pub fn error(&mut self, message: impl Into<String>, details: JsonValue) {
        self.push(LogLevel::Error, message, Some(details));
    }

    #[must_use]
    pub fn lines(&self) -> &[NodeLogLine] {
        &self.lines
    }

    /// Converts the collected lines into run log entries for `node`.
    #[must_use]
    pub fn into_entries(self, run_id: WorkflowRunId, node: &Node) -> Vec<LogEntry> {
        self.lines
            .into_iter()
            .map(|line| {
                let entry = LogEntry::new(run_id, node.name.clone(), line.level, line.message)
                    .for_node(node.id);
                match line.details {
                    Some(details) => entry.with_details(details),
                    None => entry,
                }
            })
            .collect()
    }
}
