//! Error types for the store crate.
//!
//! Graph, configuration and document errors from the workflow crate are
//! wrapped so callers can tell a rejected mutation from a backend failure.

use std::fmt;
use taskgraph_core::{EdgeId, NodeId, WorkflowId};
use taskgraph_workflow::{ConfigurationError, ExportError, GraphError, ImportError};

/// Errors from workflow persistence and mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// No workflow with this ID.
    NotFound { workflow_id: WorkflowId },
    /// A workflow with this ID is already stored.
    AlreadyExists { workflow_id: WorkflowId },
    /// The node is not part of the workflow.
    NodeNotFound { node_id: NodeId },
    /// The edge is not part of the workflow.
    EdgeNotFound { edge_id: EdgeId },
    /// The caller's version is stale.
    VersionConflict {
        workflow_id: WorkflowId,
        expected: u64,
        actual: u64,
    },
    /// Workflow names must not be blank.
    InvalidWorkflowName,
    /// The mutation would break a graph invariant.
    Structural(GraphError),
    /// A node configuration is invalid.
    Configuration(ConfigurationError),
    /// An interchange document was refused.
    Import(ImportError),
    /// The interchange snapshot could not be written.
    Export(ExportError),
    /// The storage backend failed.
    Backend { reason: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { workflow_id } => write!(f, "workflow not found: {workflow_id}"),
            Self::AlreadyExists { workflow_id } => {
                write!(f, "workflow already exists: {workflow_id}")
            }
            Self::NodeNotFound { node_id } => write!(f, "node not found: {node_id}"),
            Self::EdgeNotFound { edge_id } => write!(f, "edge not found: {edge_id}"),
            Self::VersionConflict {
                workflow_id,
                expected,
                actual,
            } => write!(
                f,
                "workflow {workflow_id} is at version {actual}, expected {expected}"
            ),
            Self::InvalidWorkflowName => write!(f, "workflow name cannot be empty"),
            Self::Structural(e) => write!(f, "{e}"),
            Self::Configuration(e) => write!(f, "{e}"),
            Self::Import(e) => write!(f, "{e}"),
            Self::Export(e) => write!(f, "{e}"),
            Self::Backend { reason } => write!(f, "storage backend failed: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<GraphError> for StoreError {
    fn from(e: GraphError) -> Self {
        match e {
            GraphError::NodeNotFound { node_id } => Self::NodeNotFound { node_id },
            GraphError::EdgeNotFound { edge_id } => Self::EdgeNotFound { edge_id },
            other => Self::Structural(other),
        }
    }
}

impl From<ConfigurationError> for StoreError {
    fn from(e: ConfigurationError) -> Self {
        Self::Configuration(e)
    }
}

impl From<ImportError> for StoreError {
    fn from(e: ImportError) -> Self {
        Self::Import(e)
    }
}

impl From<ExportError> for StoreError {
    fn from(e: ExportError) -> Self {
        Self::Export(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_conflict_display() {
        let err = StoreError::VersionConflict {
            workflow_id: WorkflowId::new(),
            expected: 2,
            actual: 3,
        };
        assert!(err.to_string().contains("version 3, expected 2"));
    }

    #[test]
    fn missing_node_keeps_its_own_variant() {
        let node_id = NodeId::new();
        assert_eq!(
            StoreError::from(GraphError::NodeNotFound { node_id }),
            StoreError::NodeNotFound { node_id }
        );
        assert!(matches!(
            StoreError::from(GraphError::CycleDetected { path: vec![] }),
            StoreError::Structural(_)
        ));
    }
}
