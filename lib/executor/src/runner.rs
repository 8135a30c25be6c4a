//! Drives a workflow run over its execution plan.
//!
//! Nodes run one at a time in plan order. After each node completes, its
//! outgoing edges are resolved: a Condition node keeps only the edges on the
//! port matching its outcome, and an edge guard that evaluates to false makes
//! its edge dead. Nodes whose incoming edges are all dead are skipped. The
//! first failing node stops the run and every undecided node is skipped.

use crate::context::{ExecutionContext, NodeOutput};
use crate::error::JournalError;
use crate::executor::NodeExecutor;
use crate::expression::ExpressionEngine;
use crate::journal::RunJournal;
use crate::log::NodeLog;
use crate::progress::ProgressSink;
use rootcause::Report;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use taskgraph_core::{EdgeId, NodeId};
use taskgraph_workflow::{
    ExecutionError, ExecutionPlan, LogEntry, LogLevel, Node, NodeRun, ProgressEvent,
    ProgressKind, RunRequest, Workflow, WorkflowRun,
};
use tracing::{debug, info, instrument, warn};

/// Errors that prevent a run from being recorded.
///
/// Node and graph failures are not errors here; they end the run as
/// `Failed` and are reported through the returned [`RunReport`].
#[derive(Debug)]
pub enum RunError {
    /// The run journal rejected a write.
    Journal(JournalError),
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Journal(e) => write!(f, "run journal error: {e}"),
        }
    }
}

impl std::error::Error for RunError {}

impl From<JournalError> for RunError {
    fn from(e: JournalError) -> Self {
        Self::Journal(e)
    }
}

/// Outcome of a finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run: WorkflowRun,
    /// Node records in the order they were decided.
    pub nodes: Vec<NodeRun>,
}

impl RunReport {
    /// Returns the record for the node with the given name.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&NodeRun> {
        self.nodes.iter().find(|n| n.node_name == name)
    }
}

/// Executes workflows, recording each run in a journal.
pub struct WorkflowRunner {
    executor: Arc<dyn NodeExecutor>,
    expressions: ExpressionEngine,
    journal: Arc<dyn RunJournal>,
    progress: Arc<dyn ProgressSink>,
}

impl fmt::Debug for WorkflowRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowRunner").finish_non_exhaustive()
    }
}

/// Counts decided nodes for progress percentages.
struct Progress<'a> {
    sink: &'a dyn ProgressSink,
    run: &'a WorkflowRun,
    decided: usize,
    total: usize,
}

impl Progress<'_> {
    fn percentage(&self) -> u8 {
        u8::try_from(self.decided * 100 / self.total.max(1)).unwrap_or(100)
    }

    fn publish(&self, kind: ProgressKind, message: String) {
        self.sink
            .publish(ProgressEvent::new(self.run, kind, self.percentage(), message));
    }
}

impl WorkflowRunner {
    #[must_use]
    pub fn new(
        executor: Arc<dyn NodeExecutor>,
        journal: Arc<dyn RunJournal>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            executor,
            expressions: ExpressionEngine::new(),
            journal,
            progress,
        }
    }

    /// Runs `workflow` to completion.
    ///
    /// # Errors
    ///
    /// Returns an error only if the journal fails. A failing node or an
    /// invalid graph produces a report whose run is `Failed`.
    #[instrument(skip_all, fields(workflow_id = %workflow.id, version = workflow.version()))]
    pub async fn run(
        &self,
        workflow: &Workflow,
        request: RunRequest,
    ) -> Result<RunReport, Report<RunError>> {
        let mut run = WorkflowRun::new(workflow.id, workflow.version(), request);
        self.journal.record_run(&run).await.map_err(RunError::from)?;
        run.start();
        self.journal.record_run(&run).await.map_err(RunError::from)?;
        info!(run_id = %run.id, business_id = %run.business_id, "run started");
        self.progress.publish(ProgressEvent::new(
            &run,
            ProgressKind::Started,
            0,
            format!("run {} started", run.business_id),
        ));

        let mut nodes = Vec::new();
        let outcome = self.execute_plan(workflow, &run, &mut nodes).await?;

        match outcome {
            Ok(()) => {
                run.complete();
                self.journal.record_run(&run).await.map_err(RunError::from)?;
                info!(run_id = %run.id, "run completed");
                self.progress.publish(ProgressEvent::new(
                    &run,
                    ProgressKind::Completed,
                    100,
                    format!("run {} completed", run.business_id),
                ));
            }
            Err(error) => {
                let message = error.to_string();
                warn!(run_id = %run.id, error = %message, "run failed");
                let entry = LogEntry::new(run.id, "workflow", LogLevel::Error, message.clone());
                self.journal.append_log(&entry).await.map_err(RunError::from)?;
                run.fail(message.clone());
                self.journal.record_run(&run).await.map_err(RunError::from)?;
                self.progress.publish(ProgressEvent::new(
                    &run,
                    ProgressKind::Failed {
                        error: message.clone(),
                    },
                    100,
                    message,
                ));
            }
        }

        Ok(RunReport { run, nodes })
    }

    async fn execute_plan(
        &self,
        workflow: &Workflow,
        run: &WorkflowRun,
        records: &mut Vec<NodeRun>,
    ) -> Result<Result<(), ExecutionError>, RunError> {
        if let Err(e) = workflow.validate() {
            return Ok(Err(ExecutionError::InvalidGraph {
                reason: e.to_string(),
            }));
        }
        let mut plan = match ExecutionPlan::new(&workflow.graph) {
            Ok(plan) => plan,
            Err(e) => {
                return Ok(Err(ExecutionError::InvalidGraph {
                    reason: e.to_string(),
                }));
            }
        };

        let mut progress = Progress {
            sink: self.progress.as_ref(),
            run,
            decided: 0,
            total: plan.order().len(),
        };
        let mut ctx = ExecutionContext::new(run.parameters.clone());

        while let Some(node) = plan.next_ready() {
            let mut record = NodeRun::new(run.id, node.id, node.name.clone(), node.node_type());
            record.start();
            self.journal.record_node(&record).await?;
            debug!(node = %node.name, node_type = %node.node_type(), "executing node");
            progress.publish(
                ProgressKind::NodeStarted { node_id: node.id },
                format!("executing {}", node.name),
            );

            let mut log = NodeLog::new();
            let result = self.executor.execute(node, &ctx, &mut log).await;
            for entry in log.into_entries(run.id, node) {
                self.journal.append_log(&entry).await?;
            }

            let output = match result {
                Ok(output) => output,
                Err(e) => {
                    let reason = e.to_string();
                    warn!(node = %node.name, error = %reason, "node failed");
                    record.fail(reason.clone());
                    self.journal.record_node(&record).await?;
                    records.push(record);
                    progress.decided += 1;

                    let remaining = plan.abort();
                    self.skip(workflow, &remaining, records, &mut progress).await?;
                    return Ok(Err(ExecutionError::NodeFailed {
                        node_id: node.id,
                        reason,
                    }));
                }
            };

            ctx.apply(node, &output);
            record.complete(output.value.clone());
            self.journal.record_node(&record).await?;
            records.push(record);
            progress.decided += 1;
            progress.publish(
                ProgressKind::NodeCompleted { node_id: node.id },
                format!("{} completed", node.name),
            );

            let live = match self.resolve_edges(workflow, node, &output, &ctx) {
                Ok(live) => live,
                Err(e) => {
                    let remaining = plan.abort();
                    self.skip(workflow, &remaining, records, &mut progress).await?;
                    return Ok(Err(e));
                }
            };

            let already_pruned = plan.pruned().len();
            if let Err(e) = plan.complete(node.id, |edge| live.get(&edge.id).copied().unwrap_or(false)) {
                return Ok(Err(ExecutionError::InvalidGraph {
                    reason: e.to_string(),
                }));
            }
            let pruned = plan.pruned()[already_pruned..].to_vec();
            self.skip(workflow, &pruned, records, &mut progress).await?;
        }

        Ok(Ok(()))
    }

    /// Decides which outgoing edges of a completed node stay live.
    fn resolve_edges(
        &self,
        workflow: &Workflow,
        node: &Node,
        output: &NodeOutput,
        ctx: &ExecutionContext,
    ) -> Result<HashMap<EdgeId, bool>, ExecutionError> {
        let mut live = HashMap::new();
        for edge in workflow.graph.outgoing(node.id) {
            let on_branch = output.branch.is_none_or(|outcome| edge.matches_branch(outcome));
            let passes = match edge.guard() {
                Some(guard) if on_branch => self.expressions.evaluate(guard, ctx).map_err(|e| {
                    ExecutionError::GuardFailed {
                        edge_id: edge.id,
                        reason: e.to_string(),
                    }
                })?,
                _ => on_branch,
            };
            live.insert(edge.id, passes);
        }
        Ok(live)
    }

    async fn skip(
        &self,
        workflow: &Workflow,
        node_ids: &[NodeId],
        records: &mut Vec<NodeRun>,
        progress: &mut Progress<'_>,
    ) -> Result<(), RunError> {
        for node_id in node_ids {
            let Some(node) = workflow.graph.get_node(*node_id) else {
                continue;
            };
            let mut record = NodeRun::new(progress.run.id, node.id, node.name.clone(), node.node_type());
            record.skip();
            self.journal.record_node(&record).await?;
            records.push(record);
            progress.decided += 1;
            debug!(node = %node.name, "node skipped");
            progress.publish(
                ProgressKind::NodeSkipped { node_id: node.id },
                format!("{} skipped", node.name),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::DefaultNodeExecutor;
    use crate::journal::InMemoryJournal;
    use crate::progress::{BroadcastProgress, NoProgress};
    use serde_json::{Map, json};
    use taskgraph_workflow::{
        CommandLineConfig, ConditionConfig, Edge, EndConfig, FALSE_PORT, HttpRequestConfig,
        NodeConfig, NodeStatus, RunStatus, StartConfig, TRUE_PORT,
    };
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn runner(journal: &InMemoryJournal) -> WorkflowRunner {
        WorkflowRunner::new(
            Arc::new(DefaultNodeExecutor::default()),
            Arc::new(journal.clone()),
            Arc::new(NoProgress),
        )
    }

    fn start_with(variables: serde_json::Value) -> Node {
        let variables: Map<String, serde_json::Value> =
            serde_json::from_value(variables).unwrap();
        Node::new(
            "start",
            NodeConfig::Start(StartConfig {
                name: String::new(),
                variables,
            }),
        )
    }

    fn end(name: &str) -> Node {
        Node::new(name, NodeConfig::End(EndConfig {}))
    }

    fn command(name: &str, text: &str) -> Node {
        Node::new(
            name,
            NodeConfig::CommandLine(CommandLineConfig {
                command: text.to_string(),
                timeout_seconds: None,
            }),
        )
    }

    fn status(report: &RunReport, name: &str) -> NodeStatus {
        report.node(name).unwrap().status
    }

    #[tokio::test]
    async fn linear_http_workflow_completes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"up": true})))
            .expect(1)
            .mount(&server)
            .await;

        let mut workflow = Workflow::new("health check");
        let start = workflow.add_node(start_with(json!({}))).unwrap();
        let call = workflow
            .add_node(Node::new(
                "ping",
                NodeConfig::HttpAction(HttpRequestConfig::new(
                    "GET",
                    format!("{}/health", server.uri()),
                )),
            ))
            .unwrap();
        let done = workflow.add_node(end("done")).unwrap();
        workflow.add_edge(Edge::new(start, call)).unwrap();
        workflow.add_edge(Edge::new(call, done)).unwrap();

        let journal = InMemoryJournal::new();
        let report = runner(&journal)
            .run(&workflow, RunRequest::new("health"))
            .await
            .unwrap();

        assert_eq!(report.run.status, RunStatus::Completed);
        assert_eq!(report.nodes.len(), 3);
        assert!(report.nodes.iter().all(|n| n.status == NodeStatus::Completed));
        assert_eq!(report.node("ping").unwrap().output.as_ref().unwrap()["json"]["up"], true);

        let stored = journal.run(report.run.id).await.unwrap();
        assert_eq!(stored.status, RunStatus::Completed);
        assert!(journal
            .logs(report.run.id)
            .await
            .iter()
            .any(|l| l.details.as_ref().is_some_and(|d| d["statusCode"] == 200)));
    }

    #[tokio::test]
    async fn condition_takes_false_branch() {
        let mut workflow = Workflow::new("branching");
        let start = workflow.add_node(start_with(json!({"x": -1}))).unwrap();
        let check = workflow
            .add_node(Node::new(
                "check",
                NodeConfig::Condition(ConditionConfig {
                    condition_expression: "x > 0".to_string(),
                }),
            ))
            .unwrap();
        let positive = workflow.add_node(end("positive")).unwrap();
        let negative = workflow.add_node(end("negative")).unwrap();
        workflow.add_edge(Edge::new(start, check)).unwrap();
        workflow
            .add_edge(Edge::new(check, positive).with_port(TRUE_PORT))
            .unwrap();
        workflow
            .add_edge(Edge::new(check, negative).with_port(FALSE_PORT))
            .unwrap();

        let report = runner(&InMemoryJournal::new())
            .run(&workflow, RunRequest::new("branch"))
            .await
            .unwrap();

        assert_eq!(report.run.status, RunStatus::Completed);
        assert_eq!(status(&report, "check"), NodeStatus::Completed);
        assert_eq!(status(&report, "negative"), NodeStatus::Completed);
        assert_eq!(status(&report, "positive"), NodeStatus::Skipped);
    }

    #[tokio::test]
    async fn failing_node_fails_run_and_skips_rest() {
        let mut workflow = Workflow::new("failing");
        let start = workflow.add_node(start_with(json!({}))).unwrap();
        let broken = workflow.add_node(command("broken", "exit 1")).unwrap();
        let done = workflow.add_node(end("done")).unwrap();
        workflow.add_edge(Edge::new(start, broken)).unwrap();
        workflow.add_edge(Edge::new(broken, done)).unwrap();

        let journal = InMemoryJournal::new();
        let report = runner(&journal)
            .run(&workflow, RunRequest::new("fail"))
            .await
            .unwrap();

        assert_eq!(report.run.status, RunStatus::Failed);
        assert!(report.run.error.as_deref().unwrap().contains("failed"));
        assert_eq!(status(&report, "broken"), NodeStatus::Failed);
        assert_eq!(status(&report, "done"), NodeStatus::Skipped);
        assert!(journal
            .logs(report.run.id)
            .await
            .iter()
            .any(|l| l.level == LogLevel::Error));
    }

    #[tokio::test]
    async fn cyclic_graph_fails_before_any_node_runs() {
        let mut workflow = Workflow::new("cyclic");
        let a = workflow.add_node(command("a", "true")).unwrap();
        let b = workflow.add_node(command("b", "true")).unwrap();
        workflow.add_edge(Edge::new(a, b)).unwrap();
        workflow.add_edge(Edge::new(b, a)).unwrap();

        let report = runner(&InMemoryJournal::new())
            .run(&workflow, RunRequest::new("cycle"))
            .await
            .unwrap();

        assert_eq!(report.run.status, RunStatus::Failed);
        assert!(report.nodes.is_empty());
        assert!(report.run.error.as_deref().unwrap().contains("not executable"));
    }

    #[tokio::test]
    async fn false_guard_skips_target() {
        let mut workflow = Workflow::new("guarded");
        let start = workflow.add_node(start_with(json!({"x": 1}))).unwrap();
        let big = workflow.add_node(command("big", "true")).unwrap();
        let small = workflow.add_node(command("small", "true")).unwrap();
        workflow
            .add_edge(Edge::new(start, big).with_condition("x > 10"))
            .unwrap();
        workflow
            .add_edge(Edge::new(start, small).with_condition("x <= 10"))
            .unwrap();

        let report = runner(&InMemoryJournal::new())
            .run(&workflow, RunRequest::new("guard"))
            .await
            .unwrap();

        assert_eq!(report.run.status, RunStatus::Completed);
        assert_eq!(status(&report, "big"), NodeStatus::Skipped);
        assert_eq!(status(&report, "small"), NodeStatus::Completed);
    }

    #[tokio::test]
    async fn unevaluable_guard_fails_run() {
        let mut workflow = Workflow::new("bad guard");
        let start = workflow.add_node(start_with(json!({}))).unwrap();
        let next = workflow.add_node(command("next", "true")).unwrap();
        workflow
            .add_edge(Edge::new(start, next).with_condition("missing_variable > 1"))
            .unwrap();

        let report = runner(&InMemoryJournal::new())
            .run(&workflow, RunRequest::new("guard"))
            .await
            .unwrap();

        assert_eq!(report.run.status, RunStatus::Failed);
        assert_eq!(status(&report, "next"), NodeStatus::Skipped);
    }

    #[tokio::test]
    async fn progress_events_follow_run() {
        let mut workflow = Workflow::new("progress");
        let start = workflow.add_node(start_with(json!({}))).unwrap();
        let done = workflow.add_node(end("done")).unwrap();
        workflow.add_edge(Edge::new(start, done)).unwrap();

        let progress = BroadcastProgress::new(16);
        let mut rx = progress.subscribe();
        let runner = WorkflowRunner::new(
            Arc::new(DefaultNodeExecutor::default()),
            Arc::new(InMemoryJournal::new()),
            Arc::new(progress),
        );
        let report = runner
            .run(&workflow, RunRequest::new("sync").with_business_id("order-7"))
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        let kinds: Vec<_> = events.iter().map(|e| e.kind.clone()).collect();
        assert_eq!(
            kinds,
            [
                ProgressKind::Started,
                ProgressKind::NodeStarted { node_id: start },
                ProgressKind::NodeCompleted { node_id: start },
                ProgressKind::NodeStarted { node_id: done },
                ProgressKind::NodeCompleted { node_id: done },
                ProgressKind::Completed,
            ]
        );
        assert!(events.iter().all(|e| e.business_id == "order-7"));
        assert_eq!(events[2].percentage, 50);
        assert_eq!(report.run.business_id, "order-7");
    }
}
