//! Persistence contract for workflows and an in-memory implementation.

use crate::error::StoreError;
use async_trait::async_trait;
use rootcause::prelude::Report;
use std::collections::HashMap;
use std::sync::Arc;
use taskgraph_core::WorkflowId;
use taskgraph_workflow::xml::to_document;
use taskgraph_workflow::{ExportError, Workflow, WorkflowSummary};
use tokio::sync::RwLock;

/// A stored workflow together with its interchange snapshot.
///
/// The snapshot is regenerated whenever the workflow changes and is what
/// export returns.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowRecord {
    pub workflow: Workflow,
    pub snapshot: String,
}

impl WorkflowRecord {
    /// Builds a record, rendering the snapshot from `workflow`.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be rendered.
    pub fn new(workflow: Workflow) -> Result<Self, ExportError> {
        let snapshot = to_document(&workflow)?;
        Ok(Self { workflow, snapshot })
    }
}

/// Storage for workflows, their graphs and snapshots.
///
/// Implementations store a workflow and its graph as a unit. Deleting a
/// workflow deletes its nodes and edges.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Stores a new workflow.
    async fn insert(&self, record: &WorkflowRecord) -> Result<(), Report<StoreError>>;

    /// Loads a workflow by ID.
    async fn find(&self, id: WorkflowId) -> Result<Option<WorkflowRecord>, Report<StoreError>>;

    /// Lists workflows ordered by name, only the active ones when
    /// `active_only` is set.
    async fn list(&self, active_only: bool) -> Result<Vec<WorkflowSummary>, Report<StoreError>>;

    /// Replaces a stored workflow if it is still at `expected_version`.
    ///
    /// The check and the write happen atomically.
    async fn replace(
        &self,
        record: &WorkflowRecord,
        expected_version: u64,
    ) -> Result<(), Report<StoreError>>;

    /// Deletes a workflow, returning whether it existed.
    async fn delete(&self, id: WorkflowId) -> Result<bool, Report<StoreError>>;
}

/// A [`WorkflowStore`] held in process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkflowStore {
    records: Arc<RwLock<HashMap<WorkflowId, WorkflowRecord>>>,
}

impl InMemoryWorkflowStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn insert(&self, record: &WorkflowRecord) -> Result<(), Report<StoreError>> {
        let mut records = self.records.write().await;
        let workflow_id = record.workflow.id;
        if records.contains_key(&workflow_id) {
            return Err(StoreError::AlreadyExists { workflow_id }.into());
        }
        records.insert(workflow_id, record.clone());
        Ok(())
    }

    async fn find(&self, id: WorkflowId) -> Result<Option<WorkflowRecord>, Report<StoreError>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn list(&self, active_only: bool) -> Result<Vec<WorkflowSummary>, Report<StoreError>> {
        let records = self.records.read().await;
        let mut summaries: Vec<WorkflowSummary> = records
            .values()
            .filter(|record| !active_only || record.workflow.metadata.active)
            .map(|record| WorkflowSummary::from(&record.workflow))
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(summaries)
    }

    async fn replace(
        &self,
        record: &WorkflowRecord,
        expected_version: u64,
    ) -> Result<(), Report<StoreError>> {
        let mut records = self.records.write().await;
        let workflow_id = record.workflow.id;
        let stored = records
            .get_mut(&workflow_id)
            .ok_or(StoreError::NotFound { workflow_id })?;
        let actual = stored.workflow.version();
        if actual != expected_version {
            return Err(StoreError::VersionConflict {
                workflow_id,
                expected: expected_version,
                actual,
            }
            .into());
        }
        *stored = record.clone();
        Ok(())
    }

    async fn delete(&self, id: WorkflowId) -> Result<bool, Report<StoreError>> {
        Ok(self.records.write().await.remove(&id).is_some())
    }
}
