//! Topological scheduling.
//!
//! `static_order` produces a full topological order for display and export.
//! `ExecutionPlan` is the interpreter state for one run: it hands out ready
//! nodes one at a time and, as each node completes, resolves its outgoing
//! edges as live or dead. A node becomes ready once every incoming edge is
//! resolved and at least one is live; when all of them are dead the node is
//! pruned and its own outgoing edges die with it.

use crate::edge::Edge;
use crate::error::GraphError;
use crate::graph::WorkflowGraph;
use crate::node::Node;
use crate::validate::find_cycle;
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use taskgraph_core::NodeId;

/// Returns the outgoing edges of a node in preference order: higher priority
/// first, then insertion order.
#[must_use]
pub fn preferred_edges(graph: &WorkflowGraph, node_id: NodeId) -> Vec<&Edge> {
    let mut edges = graph.outgoing(node_id);
    edges.sort_by_key(|edge| Reverse(edge.priority));
    edges
}

/// Returns every node in topological order.
///
/// Walks depth-first from each entry node, emitting a node after all of its
/// descendants, then reverses the result. Unrelated entry nodes keep
/// insertion order and siblings follow edge preference.
///
/// # Errors
///
/// Returns `CycleDetected` if the graph is not a DAG.
pub fn static_order(graph: &WorkflowGraph) -> Result<Vec<&Node>, GraphError> {
    if let Some(path) = find_cycle(graph) {
        return Err(GraphError::CycleDetected { path });
    }

    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut postorder: Vec<NodeId> = Vec::with_capacity(graph.node_count());
    let roots: Vec<NodeId> = graph.entry_nodes().iter().map(|n| n.id).collect();

    for root in roots.into_iter().rev() {
        if !visited.insert(root) {
            continue;
        }
        let mut stack = vec![(root, children(graph, root))];
        loop {
            let Some((node_id, pending)) = stack.last_mut() else {
                break;
            };
            let node_id = *node_id;
            match pending.pop() {
                Some(next) => {
                    if visited.insert(next) {
                        stack.push((next, children(graph, next)));
                    }
                }
                None => {
                    postorder.push(node_id);
                    stack.pop();
                }
            }
        }
    }

    Ok(postorder
        .into_iter()
        .rev()
        .filter_map(|id| graph.get_node(id))
        .collect())
}

/// Children to visit, arranged so that `pop` yields the least preferred first.
fn children(graph: &WorkflowGraph, node_id: NodeId) -> Vec<NodeId> {
    preferred_edges(graph, node_id)
        .into_iter()
        .map(|edge| edge.target)
        .collect()
}

/// Execution state for a single run over a validated graph.
#[derive(Debug)]
pub struct ExecutionPlan<'g> {
    graph: &'g WorkflowGraph,
    order: Vec<NodeId>,
    rank: HashMap<NodeId, usize>,
    unresolved: HashMap<NodeId, usize>,
    live: HashMap<NodeId, usize>,
    ready: BTreeSet<(usize, NodeId)>,
    dispatched: HashSet<NodeId>,
    executed: Vec<NodeId>,
    pruned: Vec<NodeId>,
}

impl<'g> ExecutionPlan<'g> {
    /// Creates a plan with every node that has no incoming edges ready.
    ///
    /// # Errors
    ///
    /// Returns `CycleDetected` if the graph is not a DAG.
    pub fn new(graph: &'g WorkflowGraph) -> Result<Self, GraphError> {
        let order: Vec<NodeId> = static_order(graph)?.into_iter().map(|n| n.id).collect();
        let rank: HashMap<NodeId, usize> =
            order.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let mut unresolved = HashMap::new();
        let mut ready = BTreeSet::new();
        for (position, node_id) in order.iter().enumerate() {
            let incoming = graph.incoming(*node_id).len();
            if incoming == 0 {
                ready.insert((position, *node_id));
            } else {
                unresolved.insert(*node_id, incoming);
            }
        }

        Ok(Self {
            graph,
            order,
            rank,
            unresolved,
            live: HashMap::new(),
            ready,
            dispatched: HashSet::new(),
            executed: Vec::new(),
            pruned: Vec::new(),
        })
    }

    /// Returns the static order the plan ranks ready nodes by.
    #[must_use]
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    /// Takes the next ready node, marking it dispatched.
    pub fn next_ready(&mut self) -> Option<&'g Node> {
        let (_, node_id) = self.ready.pop_first()?;
        self.dispatched.insert(node_id);
        self.graph.get_node(node_id)
    }

    /// Completes a dispatched node, resolving each outgoing edge as live when
    /// `is_live` returns true.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotDispatched` if the node was not handed out by
    /// [`next_ready`](Self::next_ready) or was already completed.
    pub fn complete(
        &mut self,
        node_id: NodeId,
        mut is_live: impl FnMut(&Edge) -> bool,
    ) -> Result<(), GraphError> {
        if !self.dispatched.remove(&node_id) {
            return Err(GraphError::NodeNotDispatched { node_id });
        }
        self.executed.push(node_id);

        let resolved: Vec<(NodeId, bool)> = self
            .graph
            .outgoing(node_id)
            .into_iter()
            .map(|edge| (edge.target, is_live(edge)))
            .collect();
        self.resolve(resolved);
        Ok(())
    }

    /// Completes a Condition node: only edges on the matching port stay live.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotDispatched` as for [`complete`](Self::complete).
    pub fn complete_branch(&mut self, node_id: NodeId, outcome: bool) -> Result<(), GraphError> {
        self.complete(node_id, |edge| edge.matches_branch(outcome))
    }

    /// Stops the plan, returning the nodes that were neither executed, pruned
    /// nor in flight, in static order.
    pub fn abort(&mut self) -> Vec<NodeId> {
        self.ready.clear();
        let decided: HashSet<NodeId> = self
            .executed
            .iter()
            .chain(&self.pruned)
            .chain(&self.dispatched)
            .copied()
            .collect();
        self.dispatched.clear();
        self.unresolved.clear();

        self.order
            .iter()
            .filter(|id| !decided.contains(id))
            .copied()
            .collect()
    }

    /// Nodes completed so far, in completion order.
    #[must_use]
    pub fn executed(&self) -> &[NodeId] {
        &self.executed
    }

    /// Nodes excluded from the run because every path to them was dead.
    #[must_use]
    pub fn pruned(&self) -> &[NodeId] {
        &self.pruned
    }

    /// Returns true once no node is ready or in flight.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.ready.is_empty() && self.dispatched.is_empty()
    }

    fn resolve(&mut self, edges: Vec<(NodeId, bool)>) {
        let mut work: VecDeque<(NodeId, bool)> = edges.into();

        while let Some((target, live)) = work.pop_front() {
            let Some(remaining) = self.unresolved.get_mut(&target) else {
                continue;
            };
            *remaining = remaining.saturating_sub(1);
            let settled = *remaining == 0;

            if live {
                *self.live.entry(target).or_insert(0) += 1;
            }
            if !settled {
                continue;
            }
            self.unresolved.remove(&target);

            if self.live.get(&target).copied().unwrap_or(0) > 0 {
                let rank = self.rank.get(&target).copied().unwrap_or(usize::MAX);
                self.ready.insert((rank, target));
            } else {
                self.pruned.push(target);
                work.extend(
                    self.graph
                        .outgoing(target)
                        .into_iter()
                        .map(|edge| (edge.target, false)),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{FALSE_PORT, TRUE_PORT};
    use crate::node::{CommandLineConfig, ConditionConfig, EndConfig, NodeConfig, StartConfig};

    fn start(name: &str) -> Node {
        Node::new(name, NodeConfig::Start(StartConfig::default()))
    }

    fn step(name: &str) -> Node {
        Node::new(
            name,
            NodeConfig::CommandLine(CommandLineConfig {
                command: "true".to_string(),
                timeout_seconds: None,
            }),
        )
    }

    fn condition(name: &str) -> Node {
        Node::new(
            name,
            NodeConfig::Condition(ConditionConfig {
                condition_expression: "x > 0".to_string(),
            }),
        )
    }

    fn end(name: &str) -> Node {
        Node::new(name, NodeConfig::End(EndConfig {}))
    }

    fn names<'a>(graph: &'a WorkflowGraph, ids: &[NodeId]) -> Vec<&'a str> {
        ids.iter()
            .filter_map(|id| graph.get_node(*id))
            .map(|n| n.name.as_str())
            .collect()
    }

    /// Runs the plan to completion, taking `outcome` at every Condition node.
    fn drive(graph: &WorkflowGraph, outcome: bool) -> ExecutionPlan<'_> {
        let mut plan = ExecutionPlan::new(graph).unwrap();
        while let Some(node) = plan.next_ready() {
            match node.config {
                NodeConfig::Condition(_) => plan.complete_branch(node.id, outcome).unwrap(),
                _ => plan.complete(node.id, |_| true).unwrap(),
            }
        }
        assert!(plan.is_finished());
        plan
    }

    #[test]
    fn static_order_respects_every_edge() {
        let mut graph = WorkflowGraph::new();
        let d = graph.add_node(end("d")).unwrap();
        let c = graph.add_node(step("c")).unwrap();
        let b = graph.add_node(step("b")).unwrap();
        let a = graph.add_node(start("a")).unwrap();
        graph.add_edge(Edge::new(a, b)).unwrap();
        graph.add_edge(Edge::new(a, c)).unwrap();
        graph.add_edge(Edge::new(b, d)).unwrap();
        graph.add_edge(Edge::new(c, d)).unwrap();

        let order: Vec<NodeId> = static_order(&graph).unwrap().iter().map(|n| n.id).collect();
        let position = |id: NodeId| order.iter().position(|x| *x == id).unwrap();
        for edge in graph.edges() {
            assert!(position(edge.source) < position(edge.target));
        }
    }

    #[test]
    fn static_order_prefers_higher_priority() {
        let mut graph = WorkflowGraph::new();
        let a = graph.add_node(start("a")).unwrap();
        let low = graph.add_node(step("low")).unwrap();
        let high = graph.add_node(step("high")).unwrap();
        graph.add_edge(Edge::new(a, low).with_priority(1)).unwrap();
        graph.add_edge(Edge::new(a, high).with_priority(10)).unwrap();

        let order: Vec<&str> = static_order(&graph)
            .unwrap()
            .iter()
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(order, ["a", "high", "low"]);
    }

    #[test]
    fn static_order_keeps_insertion_order_for_unrelated_nodes() {
        let mut graph = WorkflowGraph::new();
        for name in ["x", "y", "z"] {
            graph.add_node(step(name)).unwrap();
        }
        let order: Vec<&str> = static_order(&graph)
            .unwrap()
            .iter()
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(order, ["x", "y", "z"]);
    }

    #[test]
    fn static_order_rejects_cycles() {
        let mut graph = WorkflowGraph::new();
        let a = graph.add_node(step("a")).unwrap();
        let b = graph.add_node(step("b")).unwrap();
        graph.add_edge(Edge::new(a, b)).unwrap();
        graph.add_edge(Edge::new(b, a)).unwrap();
        assert!(matches!(
            static_order(&graph),
            Err(GraphError::CycleDetected { .. })
        ));
        assert!(ExecutionPlan::new(&graph).is_err());
    }

    #[test]
    fn false_branch_prunes_true_subtree() {
        let mut graph = WorkflowGraph::new();
        let s = graph.add_node(start("start")).unwrap();
        let c = graph.add_node(condition("check")).unwrap();
        let yes = graph.add_node(end("end_true")).unwrap();
        let no = graph.add_node(end("end_false")).unwrap();
        graph.add_edge(Edge::new(s, c)).unwrap();
        graph.add_edge(Edge::new(c, yes).with_port(TRUE_PORT)).unwrap();
        graph.add_edge(Edge::new(c, no).with_port(FALSE_PORT)).unwrap();

        let plan = drive(&graph, false);
        assert_eq!(
            names(&graph, plan.executed()),
            ["start", "check", "end_false"]
        );
        assert_eq!(plan.pruned(), [yes]);
    }

    #[test]
    fn pruning_propagates_through_subtree() {
        let mut graph = WorkflowGraph::new();
        let c = graph.add_node(condition("check")).unwrap();
        let a = graph.add_node(step("a")).unwrap();
        let a2 = graph.add_node(step("a2")).unwrap();
        let b = graph.add_node(step("b")).unwrap();
        graph.add_edge(Edge::new(c, a).with_port(TRUE_PORT)).unwrap();
        graph.add_edge(Edge::new(a, a2)).unwrap();
        graph.add_edge(Edge::new(c, b).with_port(FALSE_PORT)).unwrap();

        let plan = drive(&graph, true);
        assert_eq!(names(&graph, plan.executed()), ["check", "a", "a2"]);
        assert_eq!(names(&graph, plan.pruned()), ["b"]);
    }

    #[test]
    fn join_runs_when_any_incoming_edge_is_live() {
        let mut graph = WorkflowGraph::new();
        let c = graph.add_node(condition("check")).unwrap();
        let a = graph.add_node(step("a")).unwrap();
        let b = graph.add_node(step("b")).unwrap();
        let join = graph.add_node(end("join")).unwrap();
        graph.add_edge(Edge::new(c, a).with_port(TRUE_PORT)).unwrap();
        graph.add_edge(Edge::new(c, b).with_port(FALSE_PORT)).unwrap();
        graph.add_edge(Edge::new(a, join)).unwrap();
        graph.add_edge(Edge::new(b, join)).unwrap();

        let plan = drive(&graph, true);
        assert_eq!(names(&graph, plan.executed()), ["check", "a", "join"]);
        assert_eq!(names(&graph, plan.pruned()), ["b"]);
    }

    #[test]
    fn dead_guard_edges_prune_target() {
        let mut graph = WorkflowGraph::new();
        let a = graph.add_node(start("a")).unwrap();
        let b = graph.add_node(step("b")).unwrap();
        let guarded = graph
            .add_edge(Edge::new(a, b).with_condition("false"))
            .unwrap();

        let mut plan = ExecutionPlan::new(&graph).unwrap();
        let first = plan.next_ready().unwrap();
        plan.complete(first.id, |edge| edge.id != guarded).unwrap();

        assert!(plan.next_ready().is_none());
        assert_eq!(plan.pruned(), [b]);
    }

    #[test]
    fn ready_nodes_follow_priority() {
        let mut graph = WorkflowGraph::new();
        let a = graph.add_node(start("a")).unwrap();
        let low = graph.add_node(step("low")).unwrap();
        let high = graph.add_node(step("high")).unwrap();
        graph.add_edge(Edge::new(a, low)).unwrap();
        graph.add_edge(Edge::new(a, high).with_priority(5)).unwrap();

        let plan = drive(&graph, true);
        assert_eq!(names(&graph, plan.executed()), ["a", "high", "low"]);
    }

    #[test]
    fn complete_requires_dispatch() {
        let mut graph = WorkflowGraph::new();
        let a = graph.add_node(start("a")).unwrap();
        let mut plan = ExecutionPlan::new(&graph).unwrap();

        assert_eq!(
            plan.complete(a, |_| true),
            Err(GraphError::NodeNotDispatched { node_id: a })
        );
    }

    #[test]
    fn abort_returns_undecided_nodes() {
        let mut graph = WorkflowGraph::new();
        let a = graph.add_node(start("a")).unwrap();
        let b = graph.add_node(step("b")).unwrap();
        let c = graph.add_node(end("c")).unwrap();
        graph.add_edge(Edge::new(a, b)).unwrap();
        graph.add_edge(Edge::new(b, c)).unwrap();

        let mut plan = ExecutionPlan::new(&graph).unwrap();
        let first = plan.next_ready().unwrap();
        plan.complete(first.id, |_| true).unwrap();
        let failing = plan.next_ready().unwrap();
        assert_eq!(failing.id, b);

        assert_eq!(plan.abort(), [c]);
        assert!(plan.is_finished());
    }
}
