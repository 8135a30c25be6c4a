//! Persistence seam for run records and their log trail.

use crate::error::JournalError;
use async_trait::async_trait;
use std::sync::Arc;
use taskgraph_core::WorkflowRunId;
use taskgraph_workflow::{LogEntry, NodeRun, WorkflowRun};
use tokio::sync::Mutex;

/// Records runs, node runs and log entries as a run progresses, and reads
/// them back by the caller's business ID.
///
/// `record_run` and `record_node` upsert; `append_log` only appends.
#[async_trait]
pub trait RunJournal: Send + Sync {
    async fn record_run(&self, run: &WorkflowRun) -> Result<(), JournalError>;

    async fn record_node(&self, node: &NodeRun) -> Result<(), JournalError>;

    async fn append_log(&self, entry: &LogEntry) -> Result<(), JournalError>;

    /// Returns the most recently created run with this business ID.
    async fn find_run_by_business_id(
        &self,
        business_id: &str,
    ) -> Result<Option<WorkflowRun>, JournalError>;

    /// Returns the log trail of every run with this business ID, oldest
    /// entry first.
    async fn logs_for_business_id(&self, business_id: &str) -> Result<Vec<LogEntry>, JournalError>;

    /// Returns runs of a job type, newest first.
    async fn runs_by_job_type(&self, job_type: &str) -> Result<Vec<WorkflowRun>, JournalError>;
}

#[derive(Debug, Default)]
struct JournalState {
    runs: Vec<WorkflowRun>,
    nodes: Vec<NodeRun>,
    logs: Vec<LogEntry>,
}

/// Journal kept in memory, for tests and one-shot CLI runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryJournal {
    state: Arc<Mutex<JournalState>>,
}

impl InMemoryJournal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run(&self, run_id: WorkflowRunId) -> Option<WorkflowRun> {
        let state = self.state.lock().await;
        state.runs.iter().find(|r| r.id == run_id).cloned()
    }

    /// Returns node records for a run in first-recorded order.
    pub async fn nodes(&self, run_id: WorkflowRunId) -> Vec<NodeRun> {
        let state = self.state.lock().await;
        state
            .nodes
            .iter()
            .filter(|n| n.run_id == run_id)
            .cloned()
            .collect()
    }

    pub async fn logs(&self, run_id: WorkflowRunId) -> Vec<LogEntry> {
        let state = self.state.lock().await;
        state
            .logs
            .iter()
            .filter(|l| l.run_id == run_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RunJournal for InMemoryJournal {
    async fn record_run(&self, run: &WorkflowRun) -> Result<(), JournalError> {
        let mut state = self.state.lock().await;
        match state.runs.iter_mut().find(|r| r.id == run.id) {
            Some(existing) => *existing = run.clone(),
            None => state.runs.push(run.clone()),
        }
        Ok(())
    }

    async fn record_node(&self, node: &NodeRun) -> Result<(), JournalError> {
        let mut state = self.state.lock().await;
        match state
            .nodes
            .iter_mut()
            .find(|n| n.run_id == node.run_id && n.node_id == node.node_id)
        {
            Some(existing) => *existing = node.clone(),
            None => state.nodes.push(node.clone()),
        }
        Ok(())
    }

    async fn append_log(&self, entry: &LogEntry) -> Result<(), JournalError> {
        self.state.lock().await.logs.push(entry.clone());
        Ok(())
    }

    async fn find_run_by_business_id(
        &self,
        business_id: &str,
    ) -> Result<Option<WorkflowRun>, JournalError> {
        let state = self.state.lock().await;
        Ok(state
            .runs
            .iter()
            .filter(|r| r.business_id == business_id)
            .max_by_key(|r| (r.created_at, r.id))
            .cloned())
    }

    async fn logs_for_business_id(&self, business_id: &str) -> Result<Vec<LogEntry>, JournalError> {
        let state = self.state.lock().await;
        let run_ids: Vec<WorkflowRunId> = state
            .runs
            .iter()
            .filter(|r| r.business_id == business_id)
            .map(|r| r.id)
            .collect();
        let mut logs: Vec<LogEntry> = state
            .logs
            .iter()
            .filter(|l| run_ids.contains(&l.run_id))
            .cloned()
            .collect();
        logs.sort_by_key(|l| l.timestamp);
        Ok(logs)
    }

    async fn runs_by_job_type(&self, job_type: &str) -> Result<Vec<WorkflowRun>, JournalError> {
        let state = self.state.lock().await;
        let mut runs: Vec<WorkflowRun> = state
            .runs
            .iter()
            .filter(|r| r.job_type == job_type)
            .cloned()
            .collect();
        runs.sort_by_key(|r| std::cmp::Reverse((r.created_at, r.id)));
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskgraph_core::{NodeId, WorkflowId};
    use taskgraph_workflow::{LogLevel, NodeStatus, NodeType, RunRequest, RunStatus};

    #[tokio::test]
    async fn records_upsert() {
        let journal = InMemoryJournal::new();
        let mut run = WorkflowRun::new(WorkflowId::new(), 1, RunRequest::new("sync"));
        journal.record_run(&run).await.unwrap();
        run.start();
        journal.record_run(&run).await.unwrap();

        assert_eq!(journal.run(run.id).await.unwrap().status, RunStatus::Running);

        let mut node = NodeRun::new(run.id, NodeId::new(), "a", NodeType::End);
        journal.record_node(&node).await.unwrap();
        node.skip();
        journal.record_node(&node).await.unwrap();

        let nodes = journal.nodes(run.id).await;
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].status, NodeStatus::Skipped);
    }

    #[tokio::test]
    async fn run_and_logs_are_found_by_business_id() {
        let journal = InMemoryJournal::new();
        let run = WorkflowRun::new(
            WorkflowId::new(),
            1,
            RunRequest::new("sync").with_business_id("order-42"),
        );
        let other = WorkflowRun::new(WorkflowId::new(), 1, RunRequest::new("sync"));
        journal.record_run(&run).await.unwrap();
        journal.record_run(&other).await.unwrap();
        journal
            .append_log(&LogEntry::new(run.id, "fetch", LogLevel::Info, "fetched"))
            .await
            .unwrap();
        journal
            .append_log(&LogEntry::new(other.id, "fetch", LogLevel::Info, "elsewhere"))
            .await
            .unwrap();
        journal
            .append_log(&LogEntry::new(run.id, "store", LogLevel::Error, "store failed"))
            .await
            .unwrap();

        let found = journal.find_run_by_business_id("order-42").await.unwrap();
        assert_eq!(found.map(|r| r.id), Some(run.id));
        assert!(
            journal
                .find_run_by_business_id("order-43")
                .await
                .unwrap()
                .is_none()
        );

        let messages: Vec<_> = journal
            .logs_for_business_id("order-42")
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.message)
            .collect();
        assert_eq!(messages, ["fetched", "store failed"]);
        assert!(journal.logs_for_business_id("order-43").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn runs_are_listed_by_job_type_newest_first() {
        let journal = InMemoryJournal::new();
        let mut first = WorkflowRun::new(WorkflowId::new(), 1, RunRequest::new("nightly"));
        first.created_at -= chrono::Duration::minutes(5);
        let second = WorkflowRun::new(WorkflowId::new(), 1, RunRequest::new("nightly"));
        let manual = WorkflowRun::new(WorkflowId::new(), 1, RunRequest::new("cli"));
        for run in [&first, &second, &manual] {
            journal.record_run(run).await.unwrap();
        }

        let ids: Vec<_> = journal
            .runs_by_job_type("nightly")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, [second.id, first.id]);
    }

    #[tokio::test]
    async fn logs_append_in_order() {
        let journal = InMemoryJournal::new();
        let run_id = WorkflowRunId::new();
        journal
            .append_log(&LogEntry::new(run_id, "a", LogLevel::Info, "first"))
            .await
            .unwrap();
        journal
            .append_log(&LogEntry::new(run_id, "b", LogLevel::Error, "second"))
            .await
            .unwrap();

        let messages: Vec<_> = journal
            .logs(run_id)
            .await
            .into_iter()
            .map(|l| l.message)
            .collect();
        assert_eq!(messages, ["first", "second"]);
    }
}
