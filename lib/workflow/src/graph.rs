//! Workflow graph implementation using petgraph.
//!
//! The graph is an arena keyed by ID: nodes and edges live in a petgraph
//! `DiGraph` and edges reference their endpoints by `NodeId`. Insertion order
//! is preserved across removals, so enumeration order is stable and usable as
//! the final tie-break when ordering ready nodes.

use crate::edge::Edge;
use crate::error::GraphError;
use crate::node::{Node, NodeType};
use petgraph::Direction;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use taskgraph_core::{EdgeId, NodeId};

/// A workflow graph using petgraph's directed graph.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(try_from = "GraphData")]
pub struct WorkflowGraph {
    graph: DiGraph<Node, Edge>,
    node_index_map: HashMap<NodeId, NodeIndex>,
    edge_index_map: HashMap<EdgeId, EdgeIndex>,
}

impl WorkflowGraph {
    /// Creates a new empty workflow graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node to the graph.
    ///
    /// # Errors
    ///
    /// Returns an error if a node with the same ID already exists.
    pub fn add_node(&mut self, node: Node) -> Result<NodeId, GraphError> {
        let node_id = node.id;
        if self.node_index_map.contains_key(&node_id) {
            return Err(GraphError::DuplicateNode { node_id });
        }
        let index = self.graph.add_node(node);
        self.node_index_map.insert(node_id, index);
        Ok(node_id)
    }

    /// Removes a node from the graph together with every edge touching it.
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<Node> {
        if !self.node_index_map.contains_key(&node_id) {
            return None;
        }

        let (nodes, edges) = self.take_parts();
        let mut removed = None;
        let nodes = nodes
            .into_iter()
            .filter_map(|node| {
                if node.id == node_id {
                    removed = Some(node);
                    None
                } else {
                    Some(node)
                }
            })
            .collect();
        let edges = edges
            .into_iter()
            .filter(|edge| edge.source != node_id && edge.target != node_id)
            .collect();
        self.restore_parts(nodes, edges);
        removed
    }

    /// Replaces a node's content, keeping its position in the graph.
    ///
    /// Returns the previous node.
    ///
    /// # Errors
    ///
    /// Returns an error if no node with the same ID exists.
    pub fn replace_node(&mut self, node: Node) -> Result<Node, GraphError> {
        let index = self
            .node_index_map
            .get(&node.id)
            .copied()
            .ok_or(GraphError::NodeNotFound { node_id: node.id })?;
        let slot = self
            .graph
            .node_weight_mut(index)
            .ok_or(GraphError::NodeNotFound { node_id: node.id })?;
        Ok(std::mem::replace(slot, node))
    }

    /// Returns a reference to a node by its ID.
    #[must_use]
    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        let index = self.node_index_map.get(&node_id)?;
        self.graph.node_weight(*index)
    }

    /// Returns true if the graph contains the node.
    #[must_use]
    pub fn contains_node(&self, node_id: NodeId) -> bool {
        self.node_index_map.contains_key(&node_id)
    }

    /// Adds an edge between two existing nodes.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Source or target node doesn't exist
    /// - An edge with the same ID already exists
    pub fn add_edge(&mut self, edge: Edge) -> Result<EdgeId, GraphError> {
        let (source, target) = self.endpoints(&edge)?;
        let edge_id = edge.id;
        if self.edge_index_map.contains_key(&edge_id) {
            return Err(GraphError::DuplicateEdge { edge_id });
        }
        let index = self.graph.add_edge(source, target, edge);
        self.edge_index_map.insert(edge_id, index);
        Ok(edge_id)
    }

    /// Removes an edge from the graph.
    pub fn remove_edge(&mut self, edge_id: EdgeId) -> Option<Edge> {
        if !self.edge_index_map.contains_key(&edge_id) {
            return None;
        }

        let (nodes, edges) = self.take_parts();
        let mut removed = None;
        let edges = edges
            .into_iter()
            .filter_map(|edge| {
                if edge.id == edge_id {
                    removed = Some(edge);
                    None
                } else {
                    Some(edge)
                }
            })
            .collect();
        self.restore_parts(nodes, edges);
        removed
    }

    /// Replaces an edge, possibly moving its endpoints, keeping its position
    /// in enumeration order.
    ///
    /// Returns the previous edge.
    ///
    /// # Errors
    ///
    /// Returns an error if the edge or either new endpoint doesn't exist.
    pub fn replace_edge(&mut self, edge: Edge) -> Result<Edge, GraphError> {
        let index = self
            .edge_index_map
            .get(&edge.id)
            .copied()
            .ok_or(GraphError::EdgeNotFound { edge_id: edge.id })?;
        self.endpoints(&edge)?;

        let previous = self
            .graph
            .edge_weight(index)
            .cloned()
            .ok_or(GraphError::EdgeNotFound { edge_id: edge.id })?;

        if previous.source == edge.source && previous.target == edge.target {
            if let Some(slot) = self.graph.edge_weight_mut(index) {
                *slot = edge;
            }
        } else {
            let (nodes, edges) = self.take_parts();
            let edges = edges
                .into_iter()
                .map(|existing| {
                    if existing.id == edge.id {
                        edge.clone()
                    } else {
                        existing
                    }
                })
                .collect();
            self.restore_parts(nodes, edges);
        }
        Ok(previous)
    }

    /// Returns a reference to an edge by its ID.
    #[must_use]
    pub fn get_edge(&self, edge_id: EdgeId) -> Option<&Edge> {
        let index = self.edge_index_map.get(&edge_id)?;
        self.graph.edge_weight(*index)
    }

    /// Returns all nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    /// Returns all edges in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.graph.edge_weights()
    }

    /// Returns the number of nodes in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the number of edges in the graph.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Returns the insertion position of a node.
    #[must_use]
    pub fn position(&self, node_id: NodeId) -> Option<usize> {
        self.node_index_map.get(&node_id).map(|index| index.index())
    }

    /// Returns nodes that have no incoming edges (entry points).
    pub fn entry_nodes(&self) -> Vec<&Node> {
        self.graph
            .node_indices()
            .filter(|&idx| self.graph.edges_directed(idx, Direction::Incoming).count() == 0)
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect()
    }

    /// Returns nodes that have no outgoing edges (terminal nodes).
    pub fn terminal_nodes(&self) -> Vec<&Node> {
        self.graph
            .node_indices()
            .filter(|&idx| self.graph.edges_directed(idx, Direction::Outgoing).count() == 0)
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect()
    }

    /// Returns nodes of the given type, in insertion order.
    pub fn nodes_of_type(&self, node_type: NodeType) -> impl Iterator<Item = &Node> {
        self.nodes().filter(move |n| n.node_type() == node_type)
    }

    /// Returns the outgoing edges of a node in insertion order.
    #[must_use]
    pub fn outgoing(&self, node_id: NodeId) -> Vec<&Edge> {
        self.directed_edges(node_id, Direction::Outgoing)
    }

    /// Returns the incoming edges of a node in insertion order.
    #[must_use]
    pub fn incoming(&self, node_id: NodeId) -> Vec<&Edge> {
        self.directed_edges(node_id, Direction::Incoming)
    }

    /// Returns the successors (downstream nodes) of a given node.
    pub fn successors(&self, node_id: NodeId) -> Vec<(&Node, &Edge)> {
        self.outgoing(node_id)
            .into_iter()
            .filter_map(|edge| Some((self.get_node(edge.target)?, edge)))
            .collect()
    }

    /// Returns the predecessors (upstream nodes) of a given node.
    pub fn predecessors(&self, node_id: NodeId) -> Vec<(&Node, &Edge)> {
        self.incoming(node_id)
            .into_iter()
            .filter_map(|edge| Some((self.get_node(edge.source)?, edge)))
            .collect()
    }

    /// Validates the graph structure.
    ///
    /// # Errors
    ///
    /// Returns the first structural error found.
    pub fn validate(&self) -> Result<(), GraphError> {
        crate::validate::validate_graph(self)
    }

    fn directed_edges(&self, node_id: NodeId, direction: Direction) -> Vec<&Edge> {
        let Some(&index) = self.node_index_map.get(&node_id) else {
            return Vec::new();
        };

        let mut edges: Vec<_> = self.graph.edges_directed(index, direction).collect();
        edges.sort_by_key(|edge| edge.id().index());
        edges.into_iter().map(|edge| edge.weight()).collect()
    }

    fn endpoints(&self, edge: &Edge) -> Result<(NodeIndex, NodeIndex), GraphError> {
        let source = self
            .node_index_map
            .get(&edge.source)
            .copied()
            .ok_or(GraphError::NodeNotFound {
                node_id: edge.source,
            })?;
        let target = self
            .node_index_map
            .get(&edge.target)
            .copied()
            .ok_or(GraphError::NodeNotFound {
                node_id: edge.target,
            })?;
        Ok((source, target))
    }

    fn take_parts(&mut self) -> (Vec<Node>, Vec<Edge>) {
        let (nodes, edges) = std::mem::take(&mut self.graph).into_nodes_edges();
        self.node_index_map.clear();
        self.edge_index_map.clear();
        (
            nodes.into_iter().map(|n| n.weight).collect(),
            edges.into_iter().map(|e| e.weight).collect(),
        )
    }

    fn restore_parts(&mut self, nodes: Vec<Node>, edges: Vec<Edge>) {
        for node in nodes {
            let node_id = node.id;
            let index = self.graph.add_node(node);
            self.node_index_map.insert(node_id, index);
        }
        for edge in edges {
            let (Some(&source), Some(&target)) = (
                self.node_index_map.get(&edge.source),
                self.node_index_map.get(&edge.target),
            ) else {
                continue;
            };
            let edge_id = edge.id;
            let index = self.graph.add_edge(source, target, edge);
            self.edge_index_map.insert(edge_id, index);
        }
    }
}

impl PartialEq for WorkflowGraph {
    fn eq(&self, other: &Self) -> bool {
        self.nodes().eq(other.nodes()) && self.edges().eq(other.edges())
    }
}

impl Serialize for WorkflowGraph {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let nodes: Vec<_> = self.nodes().collect();
        let edges: Vec<_> = self.edges().collect();

        let mut state = serializer.serialize_struct("Graph", 2)?;
        state.serialize_field("nodes", &nodes)?;
        state.serialize_field("edges", &edges)?;
        state.end()
    }
}

/// Serialized shape of a graph.
#[derive(Deserialize)]
struct GraphData {
    #[serde(default)]
    nodes: Vec<Node>,
    #[serde(default)]
    edges: Vec<Edge>,
}

impl TryFrom<GraphData> for WorkflowGraph {
    type Error = GraphError;

    fn try_from(data: GraphData) -> Result<Self, Self::Error> {
        let mut graph = Self::new();
        for node in data.nodes {
            graph.add_node(node)?;
        }
        for edge in data.edges {
            graph.add_edge(edge)?;
        }
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{CommandLineConfig, EndConfig, NodeConfig, StartConfig};

    fn start(name: &str) -> Node {
        Node::new(name, NodeConfig::Start(StartConfig::default()))
    }

    fn command(name: &str) -> Node {
        Node::new(
            name,
            NodeConfig::CommandLine(CommandLineConfig {
                command: "true".to_string(),
                timeout_seconds: None,
            }),
        )
    }

    fn end(name: &str) -> Node {
        Node::new(name, NodeConfig::End(EndConfig {}))
    }

    #[test]
    fn add_and_get_node() {
        let mut graph = WorkflowGraph::new();
        let node_id = graph.add_node(start("Begin")).unwrap();

        let retrieved = graph.get_node(node_id);
        assert!(retrieved.is_some());
        assert_eq!(retrieved.unwrap().name, "Begin");
    }

    #[test]
    fn duplicate_node_rejected() {
        let mut graph = WorkflowGraph::new();
        let node = start("Begin");
        graph.add_node(node.clone()).unwrap();
        assert!(matches!(
            graph.add_node(node),
            Err(GraphError::DuplicateNode { .. })
        ));
    }

    #[test]
    fn add_edge_requires_endpoints() {
        let mut graph = WorkflowGraph::new();
        let a = graph.add_node(start("a")).unwrap();
        let missing = NodeId::new();

        let result = graph.add_edge(Edge::new(a, missing));
        assert_eq!(result, Err(GraphError::NodeNotFound { node_id: missing }));
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn remove_node_cascades_edges_and_keeps_order() {
        let mut graph = WorkflowGraph::new();
        let a = graph.add_node(start("a")).unwrap();
        let b = graph.add_node(command("b")).unwrap();
        let c = graph.add_node(command("c")).unwrap();
        let d = graph.add_node(end("d")).unwrap();
        graph.add_edge(Edge::new(a, b)).unwrap();
        graph.add_edge(Edge::new(b, c)).unwrap();
        let kept = graph.add_edge(Edge::new(c, d)).unwrap();

        let removed = graph.remove_node(b).unwrap();
        assert_eq!(removed.name, "b");
        assert_eq!(graph.edge_count(), 1);
        assert!(graph.get_edge(kept).is_some());

        let names: Vec<_> = graph.nodes().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["a", "c", "d"]);
        assert_eq!(graph.position(d), Some(2));
        assert_eq!(graph.outgoing(c).len(), 1);
    }

    #[test]
    fn replace_edge_moves_endpoints() {
        let mut graph = WorkflowGraph::new();
        let a = graph.add_node(start("a")).unwrap();
        let b = graph.add_node(command("b")).unwrap();
        let c = graph.add_node(end("c")).unwrap();
        let first = graph.add_edge(Edge::new(a, b)).unwrap();
        graph.add_edge(Edge::new(b, c)).unwrap();

        let mut moved = graph.get_edge(first).unwrap().clone();
        moved.target = c;
        graph.replace_edge(moved).unwrap();

        assert_eq!(graph.get_edge(first).unwrap().target, c);
        assert!(graph.outgoing(a).iter().all(|e| e.target == c));
        assert_eq!(graph.incoming(c).len(), 2);
        assert_eq!(graph.edges().next().unwrap().id, first);
    }

    #[test]
    fn outgoing_in_insertion_order() {
        let mut graph = WorkflowGraph::new();
        let a = graph.add_node(start("a")).unwrap();
        let b = graph.add_node(end("b")).unwrap();
        let c = graph.add_node(end("c")).unwrap();
        let first = graph.add_edge(Edge::new(a, b)).unwrap();
        let second = graph.add_edge(Edge::new(a, c)).unwrap();

        let ids: Vec<_> = graph.outgoing(a).iter().map(|e| e.id).collect();
        assert_eq!(ids, [first, second]);
    }

    #[test]
    fn entry_and_terminal_nodes() {
        let mut graph = WorkflowGraph::new();
        let a = graph.add_node(start("a")).unwrap();
        let b = graph.add_node(end("b")).unwrap();
        graph.add_edge(Edge::new(a, b)).unwrap();

        let entries = graph.entry_nodes();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "a");
        assert_eq!(graph.terminal_nodes()[0].name, "b");
    }

    #[test]
    fn graph_serde_roundtrip() {
        let mut graph = WorkflowGraph::new();
        let a = graph.add_node(start("a")).unwrap();
        let b = graph.add_node(end("b")).unwrap();
        graph.add_edge(Edge::new(a, b).with_priority(3)).unwrap();

        let json = serde_json::to_string(&graph).expect("serialize");
        let parsed: WorkflowGraph = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(parsed, graph);
        assert!(parsed.get_node(a).is_some());
        assert_eq!(parsed.successors(a)[0].0.id, b);
    }

    #[test]
    fn deserialize_rejects_dangling_edges() {
        let json = serde_json::json!({
            "nodes": [],
            "edges": [Edge::new(NodeId::new(), NodeId::new())]
        });
        assert!(serde_json::from_value::<WorkflowGraph>(json).is_err());
    }
}
