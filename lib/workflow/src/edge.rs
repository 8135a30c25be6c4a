//! Edge types for workflow graphs.
//!
//! Edges connect a source node to a target node. An edge may carry:
//! - A port label (`true`/`false`), used only on Condition node outputs
//! - A guard expression, evaluated when the source node completes
//! - A priority, preferring higher values among ready successors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taskgraph_core::{EdgeId, NodeId, WorkflowId};

/// Port taken when a Condition node evaluates to true.
pub const TRUE_PORT: &str = "true";
/// Port taken when a Condition node evaluates to false.
pub const FALSE_PORT: &str = "false";

/// A directed connection between two nodes of the same workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Unique identifier for this edge.
    pub id: EdgeId,
    /// The owning workflow, stamped when the edge joins one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<WorkflowId>,
    /// The source node.
    pub source: NodeId,
    /// The target node.
    pub target: NodeId,
    /// Output port on the source node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    /// Guard expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default)]
    pub priority: i32,
    /// Opaque editor styling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Edge {
    /// Creates a new edge between two nodes.
    #[must_use]
    pub fn new(source: NodeId, target: NodeId) -> Self {
        let now = Utc::now();
        Self {
            id: EdgeId::new(),
            workflow_id: None,
            source,
            target,
            port: None,
            condition: None,
            priority: 0,
            style: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the port label.
    #[must_use]
    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }

    /// Sets the guard expression.
    #[must_use]
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Returns the guard expression if one is set and non-blank.
    #[must_use]
    pub fn guard(&self) -> Option<&str> {
        self.condition
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    /// Returns true if this edge is taken for the given condition outcome.
    #[must_use]
    pub fn matches_branch(&self, outcome: bool) -> bool {
        let expected = if outcome { TRUE_PORT } else { FALSE_PORT };
        self.port.as_deref() == Some(expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_builder() {
        let (a, b) = (NodeId::new(), NodeId::new());
        let edge = Edge::new(a, b)
            .with_port(TRUE_PORT)
            .with_condition("x > 1")
            .with_priority(5);

        assert_eq!(edge.source, a);
        assert_eq!(edge.target, b);
        assert_eq!(edge.port.as_deref(), Some("true"));
        assert_eq!(edge.guard(), Some("x > 1"));
        assert_eq!(edge.priority, 5);
        assert!(edge.workflow_id.is_none());
    }

    #[test]
    fn blank_guard_is_ignored() {
        let edge = Edge::new(NodeId::new(), NodeId::new()).with_condition("   ");
        assert_eq!(edge.guard(), None);
    }

    #[test]
    fn branch_matching() {
        let edge = Edge::new(NodeId::new(), NodeId::new()).with_port(FALSE_PORT);
        assert!(edge.matches_branch(false));
        assert!(!edge.matches_branch(true));

        let unlabeled = Edge::new(NodeId::new(), NodeId::new());
        assert!(!unlabeled.matches_branch(true));
        assert!(!unlabeled.matches_branch(false));
    }

    #[test]
    fn edge_serde_roundtrip() {
        let edge = Edge::new(NodeId::new(), NodeId::new()).with_priority(-2);
        let json = serde_json::to_string(&edge).expect("serialize");
        let parsed: Edge = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, edge);
    }
}
