//! Workflow mutations with validation and optimistic concurrency.
//!
//! Every mutation loads the stored workflow, checks the caller's version,
//! applies the change to a copy, validates the copy, bumps the version,
//! regenerates the snapshot and writes it back with a version check. A
//! rejected mutation leaves the stored workflow untouched.

use crate::error::StoreError;
use crate::store::{WorkflowRecord, WorkflowStore};
use chrono::{DateTime, Utc};
use rootcause::prelude::Report;
use std::sync::Arc;
use taskgraph_core::{EdgeId, NodeId, WorkflowId};
use taskgraph_workflow::xml;
use taskgraph_workflow::{Edge, Node, ValidationReport, Workflow, WorkflowSummary};
use tracing::{debug, info, instrument};

/// Metadata changes; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowPatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub active: Option<bool>,
    pub cron_expression: Option<Option<String>>,
    pub enable_schedule: Option<bool>,
}

/// Entry point for reading and changing stored workflows.
#[derive(Clone)]
pub struct WorkflowService {
    store: Arc<dyn WorkflowStore>,
}

impl std::fmt::Debug for WorkflowService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowService").finish_non_exhaustive()
    }
}

impl WorkflowService {
    #[must_use]
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self { store }
    }

    /// Creates an empty workflow.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is blank or the store fails.
    #[instrument(skip(self))]
    pub async fn create_workflow(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<Workflow, Report<StoreError>> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::InvalidWorkflowName.into());
        }
        let mut workflow = Workflow::new(name);
        workflow.metadata.description = description
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);

        let record = WorkflowRecord::new(workflow).map_err(StoreError::from)?;
        self.store.insert(&record).await?;
        info!(workflow_id = %record.workflow.id, "workflow created");
        Ok(record.workflow)
    }

    /// Loads a workflow.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if there is no such workflow.
    pub async fn get_workflow(&self, id: WorkflowId) -> Result<Workflow, Report<StoreError>> {
        Ok(self.load(id).await?.workflow)
    }

    /// Lists stored workflows, only the active ones when `active_only` is
    /// set.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn list_workflows(
        &self,
        active_only: bool,
    ) -> Result<Vec<WorkflowSummary>, Report<StoreError>> {
        self.store.list(active_only).await
    }

    /// Returns the nodes and edges of a workflow in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if there is no such workflow.
    pub async fn get_graph(
        &self,
        id: WorkflowId,
    ) -> Result<(Vec<Node>, Vec<Edge>), Report<StoreError>> {
        let workflow = self.get_workflow(id).await?;
        let nodes = workflow.graph.nodes().cloned().collect();
        let edges = workflow.graph.edges().cloned().collect();
        Ok((nodes, edges))
    }

    /// Edits workflow metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow is missing, the version is stale or
    /// the new name is blank.
    #[instrument(skip(self, patch))]
    pub async fn update_workflow(
        &self,
        id: WorkflowId,
        expected_version: u64,
        patch: WorkflowPatch,
    ) -> Result<Workflow, Report<StoreError>> {
        let (workflow, ()) = self
            .mutate(id, expected_version, |workflow| {
                let meta = &mut workflow.metadata;
                if let Some(name) = patch.name {
                    let name = name.trim();
                    if name.is_empty() {
                        return Err(StoreError::InvalidWorkflowName);
                    }
                    meta.name = name.to_string();
                }
                if let Some(description) = patch.description {
                    meta.description = description;
                }
                if let Some(active) = patch.active {
                    meta.active = active;
                }
                if let Some(cron_expression) = patch.cron_expression {
                    meta.cron_expression = cron_expression;
                }
                if let Some(enable_schedule) = patch.enable_schedule {
                    meta.enable_schedule = enable_schedule;
                }
                Ok(())
            })
            .await?;
        Ok(workflow)
    }

    /// Adds a node, assigning it a fresh identity and timestamps.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow is missing, the version is stale, or
    /// the node's name or configuration is invalid.
    #[instrument(skip(self, node), fields(node = %node.name))]
    pub async fn add_node(
        &self,
        id: WorkflowId,
        expected_version: u64,
        mut node: Node,
    ) -> Result<Node, Report<StoreError>> {
        let now = Utc::now();
        node.id = NodeId::new();
        node.created_at = now;
        node.updated_at = now;

        let (workflow, node_id) = self
            .mutate(id, expected_version, |workflow| {
                node.config.validate()?;
                Ok(workflow.add_node(node)?)
            })
            .await?;
        Self::node(&workflow, node_id)
    }

    /// Replaces a node's name, description, configuration and position.
    ///
    /// # Errors
    ///
    /// As for [`add_node`](Self::add_node), or `NodeNotFound`.
    #[instrument(skip(self, node), fields(node_id = %node.id))]
    pub async fn update_node(
        &self,
        id: WorkflowId,
        expected_version: u64,
        node: Node,
    ) -> Result<Node, Report<StoreError>> {
        let node_id = node.id;
        let (workflow, _) = self
            .mutate(id, expected_version, |workflow| {
                node.config.validate()?;
                Ok(workflow.replace_node(node)?)
            })
            .await?;
        Self::node(&workflow, node_id)
    }

    /// Deletes a node and every edge touching it.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow or node is missing, or the version is
    /// stale.
    #[instrument(skip(self))]
    pub async fn delete_node(
        &self,
        id: WorkflowId,
        expected_version: u64,
        node_id: NodeId,
    ) -> Result<Node, Report<StoreError>> {
        let (_, node) = self
            .mutate(id, expected_version, |workflow| {
                Ok(workflow.remove_node(node_id)?)
            })
            .await?;
        Ok(node)
    }

    /// Adds an edge, assigning it a fresh identity and timestamps.
    ///
    /// An edge that would close a cycle is rejected and nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow or an endpoint is missing, the version
    /// is stale, or the edge breaks a graph invariant.
    #[instrument(skip(self, edge), fields(source = %edge.source, target = %edge.target))]
    pub async fn add_edge(
        &self,
        id: WorkflowId,
        expected_version: u64,
        mut edge: Edge,
    ) -> Result<Edge, Report<StoreError>> {
        let now = Utc::now();
        edge.id = EdgeId::new();
        edge.created_at = now;
        edge.updated_at = now;

        let (workflow, edge_id) = self
            .mutate(id, expected_version, |workflow| Ok(workflow.add_edge(edge)?))
            .await?;
        Self::edge(&workflow, edge_id)
    }

    /// Replaces an edge, possibly moving its endpoints.
    ///
    /// # Errors
    ///
    /// As for [`add_edge`](Self::add_edge), or `EdgeNotFound`.
    #[instrument(skip(self, edge), fields(edge_id = %edge.id))]
    pub async fn update_edge(
        &self,
        id: WorkflowId,
        expected_version: u64,
        edge: Edge,
    ) -> Result<Edge, Report<StoreError>> {
        let edge_id = edge.id;
        let (workflow, _) = self
            .mutate(id, expected_version, |workflow| {
                Ok(workflow.replace_edge(edge)?)
            })
            .await?;
        Self::edge(&workflow, edge_id)
    }

    /// Deletes an edge.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow or edge is missing, or the version is
    /// stale.
    #[instrument(skip(self))]
    pub async fn delete_edge(
        &self,
        id: WorkflowId,
        expected_version: u64,
        edge_id: EdgeId,
    ) -> Result<Edge, Report<StoreError>> {
        let (_, edge) = self
            .mutate(id, expected_version, |workflow| {
                Ok(workflow.remove_edge(edge_id)?)
            })
            .await?;
        Ok(edge)
    }

    /// Deletes a workflow with its graph.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if there is no such workflow.
    #[instrument(skip(self))]
    pub async fn delete_workflow(&self, id: WorkflowId) -> Result<(), Report<StoreError>> {
        if !self.store.delete(id).await? {
            return Err(StoreError::NotFound { workflow_id: id }.into());
        }
        info!(workflow_id = %id, "workflow deleted");
        Ok(())
    }

    /// Returns the stored interchange snapshot.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if there is no such workflow.
    pub async fn export_document(&self, id: WorkflowId) -> Result<String, Report<StoreError>> {
        Ok(self.load(id).await?.snapshot)
    }

    /// Imports a document as a new workflow with freshly minted identities.
    ///
    /// # Errors
    ///
    /// Returns `Import` if the document is refused; nothing is stored then.
    #[instrument(skip_all)]
    pub async fn import_document(&self, document: &str) -> Result<Workflow, Report<StoreError>> {
        let workflow = xml::import_document(document).map_err(StoreError::from)?;
        let record = WorkflowRecord::new(workflow).map_err(StoreError::from)?;
        self.store.insert(&record).await?;
        info!(
            workflow_id = %record.workflow.id,
            nodes = record.workflow.graph.node_count(),
            edges = record.workflow.graph.edge_count(),
            "workflow imported"
        );
        Ok(record.workflow)
    }

    /// Validates a stored workflow and collects lint warnings.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if there is no such workflow.
    pub async fn validate_workflow(
        &self,
        id: WorkflowId,
    ) -> Result<ValidationReport, Report<StoreError>> {
        let workflow = self.get_workflow(id).await?;
        Ok(ValidationReport::for_workflow(&workflow))
    }

    /// Stores last and next scheduled run times without a version bump.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow is missing or changed concurrently.
    pub async fn record_schedule(
        &self,
        id: WorkflowId,
        last: Option<DateTime<Utc>>,
        next: Option<DateTime<Utc>>,
    ) -> Result<Workflow, Report<StoreError>> {
        let record = self.load(id).await?;
        let version = record.workflow.version();
        let mut workflow = record.workflow;
        if last.is_some() {
            workflow.metadata.last_execution_at = last;
        }
        workflow.metadata.next_execution_at = next;

        let record = WorkflowRecord::new(workflow).map_err(StoreError::from)?;
        self.store.replace(&record, version).await?;
        debug!(workflow_id = %id, next = ?next, "schedule recorded");
        Ok(record.workflow)
    }

    async fn load(&self, id: WorkflowId) -> Result<WorkflowRecord, Report<StoreError>> {
        self.store
            .find(id)
            .await?
            .ok_or_else(|| StoreError::NotFound { workflow_id: id }.into())
    }

    async fn mutate<T>(
        &self,
        id: WorkflowId,
        expected_version: u64,
        apply: impl FnOnce(&mut Workflow) -> Result<T, StoreError>,
    ) -> Result<(Workflow, T), Report<StoreError>> {
        let record = self.load(id).await?;
        let actual = record.workflow.version();
        if actual != expected_version {
            return Err(StoreError::VersionConflict {
                workflow_id: id,
                expected: expected_version,
                actual,
            }
            .into());
        }

        let mut workflow = record.workflow;
        let value = apply(&mut workflow)?;
        workflow.validate().map_err(StoreError::from)?;
        workflow.bump_version();

        let record = WorkflowRecord::new(workflow).map_err(StoreError::from)?;
        self.store.replace(&record, expected_version).await?;
        debug!(workflow_id = %id, version = record.workflow.version(), "workflow updated");
        Ok((record.workflow, value))
    }

    fn node(workflow: &Workflow, node_id: NodeId) -> Result<Node, Report<StoreError>> {
        workflow
            .graph
            .get_node(node_id)
            .cloned()
            .ok_or_else(|| StoreError::NodeNotFound { node_id }.into())
    }

    fn edge(workflow: &Workflow, edge_id: EdgeId) -> Result<Edge, Report<StoreError>> {
        workflow
            .graph
            .get_edge(edge_id)
            .cloned()
            .ok_or_else(|| StoreError::EdgeNotFound { edge_id }.into())
    }
}
