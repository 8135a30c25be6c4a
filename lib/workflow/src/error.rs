//! Error types for the workflow crate.
//!
//! The taxonomy follows the layers a caller sees:
//! - `GraphError`: structural invariant violations (cycles, dangling
//!   endpoints, illegal condition ports)
//! - `ConfigurationError`: a node payload that cannot be interpreted for its type
//! - `ImportError`: an interchange document refused before any entity is built
//! - `ExportError`: failure to render an interchange document
//! - `ExecutionError`: run-level failures

use crate::node::NodeType;
use std::fmt;
use taskgraph_core::{EdgeId, NodeId, WorkflowId};

/// Structural errors from graph operations.
///
/// These contain only information available at the graph layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Node with the given ID was not found in the graph.
    NodeNotFound { node_id: NodeId },
    /// Edge with the given ID was not found in the graph.
    EdgeNotFound { edge_id: EdgeId },
    /// A node with this ID already exists.
    DuplicateNode { node_id: NodeId },
    /// An edge with this ID already exists.
    DuplicateEdge { edge_id: EdgeId },
    /// The edge set contains a cycle; `path` starts and ends at the same node.
    CycleDetected { path: Vec<NodeId> },
    /// A node is stamped with a different owning workflow.
    ForeignNode {
        node_id: NodeId,
        workflow_id: WorkflowId,
    },
    /// An edge is stamped with a different owning workflow.
    ForeignEdge {
        edge_id: EdgeId,
        workflow_id: WorkflowId,
    },
    /// A node has an empty name.
    EmptyNodeName { node_id: NodeId },
    /// A node name contains a character reserved for output references.
    InvalidNodeName { node_id: NodeId, name: String },
    /// The node type name is not one of the known types.
    UnknownNodeType { node_type: String },
    /// A condition node edge carries a port other than `true` or `false`.
    InvalidConditionPort {
        node_id: NodeId,
        edge_id: EdgeId,
        port: Option<String>,
    },
    /// A condition node has two edges on the same port.
    DuplicateConditionPort { node_id: NodeId, port: String },
    /// A node was completed in an execution plan without being dispatched.
    NodeNotDispatched { node_id: NodeId },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NodeNotFound { node_id } => write!(f, "node not found: {node_id}"),
            Self::EdgeNotFound { edge_id } => write!(f, "edge not found: {edge_id}"),
            Self::DuplicateNode { node_id } => write!(f, "node already exists: {node_id}"),
            Self::DuplicateEdge { edge_id } => write!(f, "edge already exists: {edge_id}"),
            Self::CycleDetected { path } => {
                let path: Vec<String> = path.iter().map(ToString::to_string).collect();
                write!(
                    f,
                    "workflow contains a cycle (not a DAG): {}",
                    path.join(" -> ")
                )
            }
            Self::ForeignNode {
                node_id,
                workflow_id,
            } => write!(f, "node {node_id} belongs to workflow {workflow_id}"),
            Self::ForeignEdge {
                edge_id,
                workflow_id,
            } => write!(f, "edge {edge_id} belongs to workflow {workflow_id}"),
            Self::EmptyNodeName { node_id } => write!(f, "node {node_id} has no name"),
            Self::InvalidNodeName { node_id, name } => {
                write!(f, "node {node_id} name '{name}' must not contain '.'")
            }
            Self::UnknownNodeType { node_type } => write!(f, "unknown node type: {node_type}"),
            Self::InvalidConditionPort {
                node_id,
                edge_id,
                port,
            } => match port {
                Some(port) => write!(
                    f,
                    "edge {edge_id} from condition node {node_id} has port '{port}', expected 'true' or 'false'"
                ),
                None => write!(
                    f,
                    "edge {edge_id} from condition node {node_id} has no port, expected 'true' or 'false'"
                ),
            },
            Self::DuplicateConditionPort { node_id, port } => {
                write!(f, "condition node {node_id} has more than one '{port}' edge")
            }
            Self::NodeNotDispatched { node_id } => {
                write!(f, "node {node_id} was not dispatched by the execution plan")
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// Errors interpreting a node's configuration payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// The payload does not match the record for the node type.
    InvalidPayload { node_type: NodeType, reason: String },
    /// A required field is missing or empty.
    MissingField {
        node_type: NodeType,
        field: &'static str,
    },
    /// The HTTP method is not supported.
    UnsupportedMethod { method: String },
    /// The curl command could not be interpreted.
    InvalidCurl { reason: String },
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPayload { node_type, reason } => {
                write!(f, "invalid {node_type} configuration: {reason}")
            }
            Self::MissingField { node_type, field } => {
                write!(f, "{node_type} configuration requires '{field}'")
            }
            Self::UnsupportedMethod { method } => write!(f, "unsupported HTTP method: {method}"),
            Self::InvalidCurl { reason } => write!(f, "invalid curl command: {reason}"),
        }
    }
}

impl std::error::Error for ConfigurationError {}

/// Errors refusing an interchange document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportError {
    /// The document is empty.
    Empty,
    /// The document is not well-formed XML.
    Malformed { reason: String },
    /// The root element is not `Workflow`.
    UnexpectedRoot { found: String },
    /// The workflow `Name` element is missing or empty.
    MissingWorkflowName,
    /// A node element has a missing or unparseable `Id`.
    InvalidNodeId { value: String },
    /// Two node elements share an `Id`.
    DuplicateNodeId { value: String },
    /// An edge element references a node that is not declared.
    UnknownEdgeEndpoint {
        edge: String,
        end: &'static str,
        node: String,
    },
    /// An attribute or element value could not be parsed.
    InvalidValue {
        element: String,
        field: String,
        value: String,
    },
    /// A node declares an unknown type.
    UnknownNodeType { value: String },
    /// A node configuration payload was rejected.
    Configuration {
        node: String,
        error: ConfigurationError,
    },
    /// The rebuilt graph violates a structural invariant.
    Structural(GraphError),
}

impl fmt::Display for ImportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "document content is empty"),
            Self::Malformed { reason } => write!(f, "XML parsing error: {reason}"),
            Self::UnexpectedRoot { found } => {
                write!(f, "root element must be 'Workflow', found '{found}'")
            }
            Self::MissingWorkflowName => write!(f, "'Name' element is required"),
            Self::InvalidNodeId { value } => write!(f, "invalid node Id: '{value}'"),
            Self::DuplicateNodeId { value } => write!(f, "duplicate node Id: '{value}'"),
            Self::UnknownEdgeEndpoint { edge, end, node } => {
                write!(f, "edge '{edge}' {end} node '{node}' not found")
            }
            Self::InvalidValue {
                element,
                field,
                value,
            } => write!(f, "invalid {field} on {element}: '{value}'"),
            Self::UnknownNodeType { value } => write!(f, "unknown node type: '{value}'"),
            Self::Configuration { node, error } => {
                write!(f, "node '{node}' configuration rejected: {error}")
            }
            Self::Structural(e) => write!(f, "document graph is invalid: {e}"),
        }
    }
}

impl std::error::Error for ImportError {}

impl From<GraphError> for ImportError {
    fn from(e: GraphError) -> Self {
        Self::Structural(e)
    }
}

/// Errors rendering an interchange document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportError {
    /// Writing an element failed.
    Write { reason: String },
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Write { reason } => write!(f, "failed to write document: {reason}"),
        }
    }
}

impl std::error::Error for ExportError {}

/// Run-level execution failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// The graph failed validation before the run started.
    InvalidGraph { reason: String },
    /// Node execution failed.
    NodeFailed { node_id: NodeId, reason: String },
    /// An edge guard could not be evaluated.
    GuardFailed { edge_id: EdgeId, reason: String },
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidGraph { reason } => write!(f, "workflow is not executable: {reason}"),
            Self::NodeFailed { node_id, reason } => {
                write!(f, "node {node_id} failed: {reason}")
            }
            Self::GuardFailed { edge_id, reason } => {
                write!(f, "guard on edge {edge_id} could not be evaluated: {reason}")
            }
        }
    }
}

impl std::error::Error for ExecutionError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_error_display() {
        let node_id = NodeId::new();
        let err = GraphError::NodeNotFound { node_id };
        assert!(err.to_string().contains("node not found"));
    }

    #[test]
    fn cycle_display_lists_path() {
        let a = NodeId::new();
        let b = NodeId::new();
        let err = GraphError::CycleDetected {
            path: vec![a, b, a],
        };
        let text = err.to_string();
        assert!(text.contains("not a DAG"));
        assert!(text.contains(&format!("{a} -> {b} -> {a}")));
    }

    #[test]
    fn configuration_error_display() {
        let err = ConfigurationError::MissingField {
            node_type: NodeType::CommandLine,
            field: "command",
        };
        assert_eq!(err.to_string(), "CommandLine configuration requires 'command'");
    }

    #[test]
    fn import_error_display() {
        assert_eq!(
            ImportError::MissingWorkflowName.to_string(),
            "'Name' element is required"
        );
        let err = ImportError::Malformed {
            reason: "unexpected end".to_string(),
        };
        assert!(err.to_string().starts_with("XML parsing error"));
    }

    #[test]
    fn execution_error_display() {
        let node_id = NodeId::new();
        let err = ExecutionError::NodeFailed {
            node_id,
            reason: "status 500".to_string(),
        };
        assert!(err.to_string().contains("failed"));
        assert!(err.to_string().contains("status 500"));
    }
}
