//! Workflow run records.
//!
//! A run moves through `Pending → Running → Completed | Failed | Cancelled`.
//! Each node gets a `NodeRun`, the permanent trail is a list of `LogEntry`
//! records, and subscribers follow along through `ProgressEvent`s keyed by the
//! caller's business identifier.

use crate::node::NodeType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use taskgraph_core::{LogEntryId, NodeId, WorkflowId, WorkflowRunId};
use ulid::Ulid;

/// The overall state of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run is queued, waiting to start.
    Pending,
    /// Run is actively executing.
    Running,
    /// Every planned node completed or was pruned.
    Completed,
    /// A node failed and the rest of the plan was abandoned.
    Failed,
    /// Run was cancelled before it started.
    Cancelled,
}

impl RunStatus {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns the storage name of this status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses a storage name written by [`RunStatus::as_str`].
    #[must_use]
    pub fn from_storage(name: &str) -> Option<Self> {
        [
            Self::Pending,
            Self::Running,
            Self::Completed,
            Self::Failed,
            Self::Cancelled,
        ]
        .into_iter()
        .find(|status| status.as_str() == name)
    }
}

/// The execution state of a single node within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// Pruned by a branch decision or abandoned after a failure.
    Skipped,
}

impl NodeStatus {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// A request to run a workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Category of the run, used as the business ID prefix.
    pub job_type: String,
    /// Caller-supplied key for progress events.
    pub business_id: Option<String>,
    pub description: Option<String>,
    /// Parameters that take precedence over node-configured HTTP bodies.
    #[serde(default)]
    pub parameters: Map<String, JsonValue>,
}

impl RunRequest {
    /// Creates a request with the given job type.
    #[must_use]
    pub fn new(job_type: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            ..Self::default()
        }
    }

    /// Sets the business ID.
    #[must_use]
    pub fn with_business_id(mut self, business_id: impl Into<String>) -> Self {
        self.business_id = Some(business_id.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Returns the business ID, generating one if the caller supplied none.
    pub fn ensure_business_id(&mut self) -> &str {
        let job_type = &self.job_type;
        self.business_id
            .get_or_insert_with(|| generate_business_id(job_type, Utc::now()))
    }
}

/// Generates `{job_type}_{yyyyMMddHHmmss}_{8 hex digits}`.
#[must_use]
pub fn generate_business_id(job_type: &str, at: DateTime<Utc>) -> String {
    let suffix = Ulid::new().random() as u32;
    format!("{job_type}_{}_{suffix:08x}", at.format("%Y%m%d%H%M%S"))
}

/// A record of a single workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: WorkflowRunId,
    pub workflow_id: WorkflowId,
    /// The workflow version the run executed.
    pub workflow_version: u64,
    pub business_id: String,
    pub job_type: String,
    pub description: Option<String>,
    pub parameters: Map<String, JsonValue>,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Error message if failed.
    pub error: Option<String>,
}

impl WorkflowRun {
    /// Creates a new pending run from a request.
    #[must_use]
    pub fn new(workflow_id: WorkflowId, workflow_version: u64, mut request: RunRequest) -> Self {
        let business_id = request.ensure_business_id().to_string();
        Self {
            id: WorkflowRunId::new(),
            workflow_id,
            workflow_version,
            business_id,
            job_type: request.job_type,
            description: request.description,
            parameters: request.parameters,
            status: RunStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    /// Starts the run.
    pub fn start(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Marks the run as completed.
    pub fn complete(&mut self) {
        self.status = RunStatus::Completed;
        self.finished_at = Some(Utc::now());
    }

    /// Marks the run as failed.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error.into());
    }

    /// Marks the run as cancelled.
    pub fn cancel(&mut self) {
        self.status = RunStatus::Cancelled;
        self.finished_at = Some(Utc::now());
    }

    /// Returns the duration of the run, if it has started.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        let start = self.started_at?;
        let end = self.finished_at.unwrap_or_else(Utc::now);
        Some(end - start)
    }
}

/// Execution record for a single node within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRun {
    pub run_id: WorkflowRunId,
    pub node_id: NodeId,
    pub node_name: String,
    pub node_type: NodeType,
    pub status: NodeStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Output made available to downstream expressions.
    pub output: Option<JsonValue>,
    pub error: Option<String>,
}

impl NodeRun {
    /// Creates a new node record in pending state.
    #[must_use]
    pub fn new(
        run_id: WorkflowRunId,
        node_id: NodeId,
        node_name: impl Into<String>,
        node_type: NodeType,
    ) -> Self {
        Self {
            run_id,
            node_id,
            node_name: node_name.into(),
            node_type,
            status: NodeStatus::Pending,
            started_at: None,
            finished_at: None,
            output: None,
            error: None,
        }
    }

    pub fn start(&mut self) {
        self.status = NodeStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn complete(&mut self, output: JsonValue) {
        self.status = NodeStatus::Completed;
        self.finished_at = Some(Utc::now());
        self.output = Some(output);
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = NodeStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error.into());
    }

    pub fn skip(&mut self) {
        self.status = NodeStatus::Skipped;
        self.finished_at = Some(Utc::now());
    }
}

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Returns the storage name of this level.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "Debug",
            Self::Info => "Info",
            Self::Warning => "Warning",
            Self::Error => "Error",
        }
    }

    #[must_use]
    pub fn from_storage(name: &str) -> Option<Self> {
        [Self::Debug, Self::Info, Self::Warning, Self::Error]
            .into_iter()
            .find(|level| level.as_str() == name)
    }
}

/// One entry in a run's permanent log trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: LogEntryId,
    pub run_id: WorkflowRunId,
    /// The node this entry is about, if any.
    pub node_id: Option<NodeId>,
    /// Short step label, usually the node name.
    pub step: String,
    pub level: LogLevel,
    pub message: String,
    /// Structured details such as request and response data.
    pub details: Option<JsonValue>,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    /// Creates a new entry timestamped now.
    #[must_use]
    pub fn new(
        run_id: WorkflowRunId,
        step: impl Into<String>,
        level: LogLevel,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: LogEntryId::new(),
            run_id,
            node_id: None,
            step: step.into(),
            level,
            message: message.into(),
            details: None,
            timestamp: Utc::now(),
        }
    }

    /// Attaches the node this entry is about.
    #[must_use]
    pub fn for_node(mut self, node_id: NodeId) -> Self {
        self.node_id = Some(node_id);
        self
    }

    /// Attaches structured details.
    #[must_use]
    pub fn with_details(mut self, details: JsonValue) -> Self {
        self.details = Some(details);
        self
    }
}

/// What a progress event reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProgressKind {
    Started,
    NodeStarted { node_id: NodeId },
    NodeCompleted { node_id: NodeId },
    NodeSkipped { node_id: NodeId },
    Completed,
    Failed { error: String },
}

/// A status transition published for subscribers of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub business_id: String,
    pub run_id: WorkflowRunId,
    #[serde(flatten)]
    pub kind: ProgressKind,
    /// Share of planned nodes decided so far, 0 to 100.
    pub percentage: u8,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    /// Creates an event for the given run.
    #[must_use]
    pub fn new(
        run: &WorkflowRun,
        kind: ProgressKind,
        percentage: u8,
        message: impl Into<String>,
    ) -> Self {
        Self {
            business_id: run.business_id.clone(),
            run_id: run.id,
            kind,
            percentage: percentage.min(100),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Returns true if this event ends the run.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, ProgressKind::Completed | ProgressKind::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_names_parse_back() {
        assert_eq!(RunStatus::from_storage("failed"), Some(RunStatus::Failed));
        assert_eq!(RunStatus::from_storage("Failed"), None);
        assert_eq!(LogLevel::from_storage("Warning"), Some(LogLevel::Warning));
        assert_eq!(LogLevel::from_storage("warn"), None);
    }

    #[test]
    fn run_status_terminal() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }

    #[test]
    fn business_id_format() {
        let at = DateTime::parse_from_rfc3339("2026-03-04T05:06:07Z")
            .unwrap()
            .with_timezone(&Utc);
        let id = generate_business_id("sync", at);
        let (prefix, suffix) = id.rsplit_once('_').unwrap();
        assert_eq!(prefix, "sync_20260304050607");
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn supplied_business_id_is_kept() {
        let mut request = RunRequest::new("sync").with_business_id("order-42");
        assert_eq!(request.ensure_business_id(), "order-42");

        let mut generated = RunRequest::new("sync");
        let first = generated.ensure_business_id().to_string();
        assert!(first.starts_with("sync_"));
        assert_eq!(generated.ensure_business_id(), first);
    }

    #[test]
    fn workflow_run_lifecycle() {
        let request = RunRequest::new("manual").with_parameter("limit", 10);
        let mut run = WorkflowRun::new(WorkflowId::new(), 3, request);

        assert_eq!(run.status, RunStatus::Pending);
        assert!(run.started_at.is_none());
        assert!(run.business_id.starts_with("manual_"));
        assert_eq!(run.parameters["limit"], 10);

        run.start();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.started_at.is_some());

        run.fail("node fetch failed");
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.finished_at.is_some());
        assert!(run.duration().is_some());
        assert_eq!(run.error.as_deref(), Some("node fetch failed"));
    }

    #[test]
    fn node_run_lifecycle() {
        let mut node = NodeRun::new(WorkflowRunId::new(), NodeId::new(), "fetch", NodeType::HttpAction);
        assert_eq!(node.status, NodeStatus::Pending);

        node.start();
        assert_eq!(node.status, NodeStatus::Running);

        node.complete(serde_json::json!({"status": 200}));
        assert_eq!(node.status, NodeStatus::Completed);
        assert!(node.status.is_terminal());
    }

    #[test]
    fn progress_event_serializes_status_tag() {
        let run = WorkflowRun::new(WorkflowId::new(), 1, RunRequest::new("job").with_business_id("b-1"));
        let event = ProgressEvent::new(
            &run,
            ProgressKind::NodeCompleted {
                node_id: NodeId::new(),
            },
            150,
            "fetch completed",
        );

        assert_eq!(event.percentage, 100);
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["status"], "node_completed");
        assert_eq!(json["business_id"], "b-1");

        let parsed: ProgressEvent = serde_json::from_value(json).expect("deserialize");
        assert_eq!(parsed, event);
    }
}
