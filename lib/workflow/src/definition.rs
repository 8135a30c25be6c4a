//! Workflow definition types.
//!
//! A workflow is a named, versioned automation that consists of:
//! - Metadata (name, description, version counter, schedule, timestamps)
//! - A directed graph of nodes, exclusively owned by the workflow

use crate::edge::Edge;
use crate::error::GraphError;
use crate::graph::WorkflowGraph;
use crate::node::Node;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taskgraph_core::{EdgeId, NodeId, WorkflowId};

/// Metadata for a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    /// Human-readable name for this workflow.
    pub name: String,
    /// Description of what this workflow does.
    pub description: Option<String>,
    /// Incremented on every structural mutation.
    pub version: u64,
    /// Whether this workflow may run.
    pub active: bool,
    /// Cron expression for scheduled runs.
    pub cron_expression: Option<String>,
    /// Whether the cron schedule is enabled.
    pub enable_schedule: bool,
    /// When the last scheduled run fired.
    pub last_execution_at: Option<DateTime<Utc>>,
    /// When the next scheduled run is due.
    pub next_execution_at: Option<DateTime<Utc>>,
    /// When this workflow was created.
    pub created_at: DateTime<Utc>,
    /// When this workflow was last updated.
    pub updated_at: DateTime<Utc>,
}

impl WorkflowMetadata {
    /// Creates new metadata with default values.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: None,
            version: 1,
            active: true,
            cron_expression: None,
            enable_schedule: false,
            last_execution_at: None,
            next_execution_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets and enables a cron schedule.
    #[must_use]
    pub fn with_schedule(mut self, cron_expression: impl Into<String>) -> Self {
        self.cron_expression = Some(cron_expression.into());
        self.enable_schedule = true;
        self
    }
}

/// A complete workflow definition.
///
/// Nodes and edges added through the workflow are stamped with its ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique identifier for this workflow.
    pub id: WorkflowId,
    /// Workflow metadata.
    pub metadata: WorkflowMetadata,
    /// The workflow graph (nodes and edges).
    pub graph: WorkflowGraph,
}

impl Workflow {
    /// Creates a new workflow with the given name and an empty graph.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(WorkflowId::new(), name)
    }

    /// Creates a workflow with a specific ID.
    #[must_use]
    pub fn with_id(id: WorkflowId, name: impl Into<String>) -> Self {
        Self {
            id,
            metadata: WorkflowMetadata::new(name),
            graph: WorkflowGraph::new(),
        }
    }

    /// Returns the workflow name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Returns the version counter.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.metadata.version
    }

    /// Returns whether the workflow is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.metadata.active
    }

    /// Returns the cron expression if the schedule is enabled.
    #[must_use]
    pub fn schedule(&self) -> Option<&str> {
        if !self.metadata.enable_schedule || !self.metadata.active {
            return None;
        }
        self.metadata
            .cron_expression
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    /// Adds a node, stamping it with this workflow's ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the node ID is already present.
    pub fn add_node(&mut self, mut node: Node) -> Result<NodeId, GraphError> {
        node.workflow_id = Some(self.id);
        self.graph.add_node(node)
    }

    /// Adds an edge, stamping it with this workflow's ID.
    ///
    /// The graph is not validated; callers check acyclicity before committing.
    ///
    /// # Errors
    ///
    /// Returns an error if either endpoint is missing or the edge ID is taken.
    pub fn add_edge(&mut self, mut edge: Edge) -> Result<EdgeId, GraphError> {
        edge.workflow_id = Some(self.id);
        self.graph.add_edge(edge)
    }

    /// Replaces a node, keeping its ownership stamp and creation time.
    ///
    /// # Errors
    ///
    /// Returns an error if the node doesn't exist.
    pub fn replace_node(&mut self, mut node: Node) -> Result<Node, GraphError> {
        let existing = self
            .graph
            .get_node(node.id)
            .ok_or(GraphError::NodeNotFound { node_id: node.id })?;
        node.workflow_id = Some(self.id);
        node.created_at = existing.created_at;
        node.updated_at = Utc::now();
        self.graph.replace_node(node)
    }

    /// Replaces an edge, keeping its ownership stamp and creation time.
    ///
    /// # Errors
    ///
    /// Returns an error if the edge or either endpoint doesn't exist.
    pub fn replace_edge(&mut self, mut edge: Edge) -> Result<Edge, GraphError> {
        let existing = self
            .graph
            .get_edge(edge.id)
            .ok_or(GraphError::EdgeNotFound { edge_id: edge.id })?;
        edge.workflow_id = Some(self.id);
        edge.created_at = existing.created_at;
        edge.updated_at = Utc::now();
        self.graph.replace_edge(edge)
    }

    /// Removes a node and its incident edges.
    ///
    /// # Errors
    ///
    /// Returns an error if the node doesn't exist.
    pub fn remove_node(&mut self, node_id: NodeId) -> Result<Node, GraphError> {
        self.graph
            .remove_node(node_id)
            .ok_or(GraphError::NodeNotFound { node_id })
    }

    /// Removes an edge.
    ///
    /// # Errors
    ///
    /// Returns an error if the edge doesn't exist.
    pub fn remove_edge(&mut self, edge_id: EdgeId) -> Result<Edge, GraphError> {
        self.graph
            .remove_edge(edge_id)
            .ok_or(GraphError::EdgeNotFound { edge_id })
    }

    /// Validates the workflow.
    ///
    /// # Errors
    ///
    /// Returns the first structural error found.
    pub fn validate(&self) -> Result<(), GraphError> {
        crate::validate::validate(self)
    }

    /// Records a structural mutation: bumps the version and `updated_at`.
    pub fn bump_version(&mut self) {
        self.metadata.version += 1;
        self.touch();
    }

    /// Marks the workflow as updated (bumps updated_at timestamp).
    pub fn touch(&mut self) {
        self.metadata.updated_at = Utc::now();
    }
}

/// Summary information about a workflow (for listings).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub id: WorkflowId,
    pub name: String,
    pub description: Option<String>,
    pub version: u64,
    pub active: bool,
    pub cron_expression: Option<String>,
    pub enable_schedule: bool,
    pub node_count: usize,
    pub edge_count: usize,
    pub updated_at: DateTime<Utc>,
}

impl From<&Workflow> for WorkflowSummary {
    fn from(workflow: &Workflow) -> Self {
        Self {
            id: workflow.id,
            name: workflow.metadata.name.clone(),
            description: workflow.metadata.description.clone(),
            version: workflow.metadata.version,
            active: workflow.metadata.active,
            cron_expression: workflow.metadata.cron_expression.clone(),
            enable_schedule: workflow.metadata.enable_schedule,
            node_count: workflow.graph.node_count(),
            edge_count: workflow.graph.edge_count(),
            updated_at: workflow.metadata.updated_at,
        }
    }
}
