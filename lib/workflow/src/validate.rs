//! Structural validation and lint warnings.
//!
//! `validate` rejects graphs that break a hard invariant, checking in order:
//! acyclicity, ownership, node content, then Condition node ports.
//! `lint` reports placement and naming issues that do not block saving or
//! running a workflow.

use crate::definition::Workflow;
use crate::edge::{FALSE_PORT, TRUE_PORT};
use crate::error::GraphError;
use crate::graph::WorkflowGraph;
use crate::node::NodeType;
use std::collections::{HashMap, HashSet};
use std::fmt;
use taskgraph_core::NodeId;

/// Validates a workflow, including ownership of every node and edge.
///
/// # Errors
///
/// Returns the first structural error found.
pub fn validate(workflow: &Workflow) -> Result<(), GraphError> {
    check_acyclic(&workflow.graph)?;
    check_ownership(workflow)?;
    check_content(&workflow.graph)?;
    check_condition_ports(&workflow.graph)
}

/// Validates a graph on its own.
///
/// # Errors
///
/// Returns the first structural error found.
pub fn validate_graph(graph: &WorkflowGraph) -> Result<(), GraphError> {
    check_acyclic(graph)?;
    check_content(graph)?;
    check_condition_ports(graph)
}

/// Finds the first cycle reachable by a depth-first walk from each node in
/// insertion order.
///
/// The returned path starts and ends at the same node.
#[must_use]
pub fn find_cycle(graph: &WorkflowGraph) -> Option<Vec<NodeId>> {
    let targets = |node_id: NodeId| -> Vec<NodeId> {
        graph
            .outgoing(node_id)
            .iter()
            .rev()
            .map(|edge| edge.target)
            .collect()
    };

    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut on_stack: HashSet<NodeId> = HashSet::new();

    for root in graph.nodes() {
        if !visited.insert(root.id) {
            continue;
        }
        on_stack.insert(root.id);
        let mut stack = vec![(root.id, targets(root.id))];

        loop {
            let Some((node_id, pending)) = stack.last_mut() else {
                break;
            };
            let node_id = *node_id;

            match pending.pop() {
                Some(next) if on_stack.contains(&next) => {
                    let start = stack.iter().position(|(id, _)| *id == next).unwrap_or(0);
                    let mut path: Vec<NodeId> = stack[start..].iter().map(|(id, _)| *id).collect();
                    path.push(next);
                    return Some(path);
                }
                Some(next) => {
                    if visited.insert(next) {
                        on_stack.insert(next);
                        stack.push((next, targets(next)));
                    }
                }
                None => {
                    on_stack.remove(&node_id);
                    stack.pop();
                }
            }
        }
    }

    None
}

fn check_acyclic(graph: &WorkflowGraph) -> Result<(), GraphError> {
    match find_cycle(graph) {
        Some(path) => Err(GraphError::CycleDetected { path }),
        None => Ok(()),
    }
}

fn check_ownership(workflow: &Workflow) -> Result<(), GraphError> {
    for node in workflow.graph.nodes() {
        match node.workflow_id {
            Some(owner) if owner != workflow.id => {
                return Err(GraphError::ForeignNode {
                    node_id: node.id,
                    workflow_id: owner,
                });
            }
            _ => {}
        }
    }
    for edge in workflow.graph.edges() {
        match edge.workflow_id {
            Some(owner) if owner != workflow.id => {
                return Err(GraphError::ForeignEdge {
                    edge_id: edge.id,
                    workflow_id: owner,
                });
            }
            _ => {}
        }
    }
    Ok(())
}

fn check_content(graph: &WorkflowGraph) -> Result<(), GraphError> {
    graph.nodes().try_for_each(|node| node.check_name())
}

fn check_condition_ports(graph: &WorkflowGraph) -> Result<(), GraphError> {
    for node in graph.nodes_of_type(NodeType::Condition) {
        let mut seen: HashSet<&str> = HashSet::new();
        for edge in graph.outgoing(node.id) {
            let port = match edge.port.as_deref() {
                Some(port @ (TRUE_PORT | FALSE_PORT)) => port,
                other => {
                    return Err(GraphError::InvalidConditionPort {
                        node_id: node.id,
                        edge_id: edge.id,
                        port: other.map(str::to_string),
                    });
                }
            };
            if !seen.insert(port) {
                return Err(GraphError::DuplicateConditionPort {
                    node_id: node.id,
                    port: port.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// A non-fatal issue with a workflow graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    /// The workflow has no nodes.
    EmptyGraph,
    /// No Start node.
    NoStartNode,
    /// More than one Start node.
    MultipleStartNodes { count: usize },
    /// A Start node has incoming edges.
    StartHasIncoming { node_id: NodeId, name: String },
    /// No End node.
    NoEndNode,
    /// An End node has outgoing edges.
    EndHasOutgoing { node_id: NodeId, name: String },
    /// A node has no edges at all.
    IsolatedNode { node_id: NodeId, name: String },
    /// A non-End node has no outgoing edges.
    DeadEnd { node_id: NodeId, name: String },
    /// Several nodes share a name, making output references ambiguous.
    DuplicateName { name: String, count: usize },
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyGraph => write!(f, "workflow has no nodes"),
            Self::NoStartNode => write!(f, "workflow has no Start node"),
            Self::MultipleStartNodes { count } => {
                write!(f, "workflow has {count} Start nodes")
            }
            Self::StartHasIncoming { name, .. } => {
                write!(f, "Start node '{name}' has incoming edges")
            }
            Self::NoEndNode => write!(f, "workflow has no End node"),
            Self::EndHasOutgoing { name, .. } => {
                write!(f, "End node '{name}' has outgoing edges")
            }
            Self::IsolatedNode { name, .. } => write!(f, "node '{name}' is not connected"),
            Self::DeadEnd { name, .. } => {
                write!(f, "node '{name}' has no outgoing edges and is not an End node")
            }
            Self::DuplicateName { name, count } => {
                write!(f, "{count} nodes are named '{name}'")
            }
        }
    }
}

/// Collects warnings about node placement and naming.
#[must_use]
pub fn lint(graph: &WorkflowGraph) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    if graph.is_empty() {
        warnings.push(ValidationWarning::EmptyGraph);
        return warnings;
    }

    let starts = graph.nodes_of_type(NodeType::Start).count();
    match starts {
        0 => warnings.push(ValidationWarning::NoStartNode),
        1 => {}
        count => warnings.push(ValidationWarning::MultipleStartNodes { count }),
    }
    if graph.nodes_of_type(NodeType::End).next().is_none() {
        warnings.push(ValidationWarning::NoEndNode);
    }

    let connected = graph.node_count() > 1;
    for node in graph.nodes() {
        let incoming = graph.incoming(node.id).len();
        let outgoing = graph.outgoing(node.id).len();
        let named = || (node.id, node.name.clone());

        match node.node_type() {
            NodeType::Start if incoming > 0 => {
                let (node_id, name) = named();
                warnings.push(ValidationWarning::StartHasIncoming { node_id, name });
            }
            NodeType::End if outgoing > 0 => {
                let (node_id, name) = named();
                warnings.push(ValidationWarning::EndHasOutgoing { node_id, name });
            }
            _ => {}
        }

        if connected && incoming == 0 && outgoing == 0 {
            let (node_id, name) = named();
            warnings.push(ValidationWarning::IsolatedNode { node_id, name });
        } else if outgoing == 0 && node.node_type() != NodeType::End {
            let (node_id, name) = named();
            warnings.push(ValidationWarning::DeadEnd { node_id, name });
        }
    }

    let mut names: HashMap<&str, usize> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();
    for node in graph.nodes() {
        let count = names.entry(node.name.as_str()).or_insert(0);
        if *count == 0 {
            order.push(node.name.as_str());
        }
        *count += 1;
    }
    for name in order {
        let count = names.get(name).copied().unwrap_or(0);
        if count > 1 {
            warnings.push(ValidationWarning::DuplicateName {
                name: name.to_string(),
                count,
            });
        }
    }

    warnings
}

/// Combined result of validation and linting.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationReport {
    /// Structural errors; at most the first one found.
    pub errors: Vec<GraphError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationReport {
    /// Validates and lints a workflow.
    #[must_use]
    pub fn for_workflow(workflow: &Workflow) -> Self {
        Self {
            errors: validate(workflow).err().into_iter().collect(),
            warnings: lint(&workflow.graph),
        }
    }

    /// Returns true if no structural error was found.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}
