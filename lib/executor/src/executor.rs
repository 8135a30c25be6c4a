//! Dispatch from node type to the code that runs it.

use crate::command::CommandExecutor;
use crate::config::ExecutorConfig;
use crate::context::{ExecutionContext, NodeOutput};
use crate::error::NodeExecutionError;
use crate::expression::ExpressionEngine;
use crate::http::HttpExecutor;
use crate::log::NodeLog;
use async_trait::async_trait;
use serde_json::json;
use taskgraph_workflow::{Node, NodeConfig};
use tracing::{debug, instrument};

/// Executes a single node against the current run context.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Runs `node`, appending what happened to `log`.
    ///
    /// # Errors
    ///
    /// Returns an error if the node fails; the run stops there.
    async fn execute(
        &self,
        node: &Node,
        ctx: &ExecutionContext,
        log: &mut NodeLog,
    ) -> Result<NodeOutput, NodeExecutionError>;
}

/// Built-in behavior for every node type.
#[derive(Debug)]
pub struct DefaultNodeExecutor {
    http: HttpExecutor,
    command: CommandExecutor,
    expressions: ExpressionEngine,
}

impl DefaultNodeExecutor {
    #[must_use]
    pub fn new(config: &ExecutorConfig) -> Self {
        Self {
            http: HttpExecutor::new(config),
            command: CommandExecutor::new(config),
            expressions: ExpressionEngine::new(),
        }
    }
}

impl Default for DefaultNodeExecutor {
    fn default() -> Self {
        Self::new(&ExecutorConfig::default())
    }
}

#[async_trait]
impl NodeExecutor for DefaultNodeExecutor {
    #[instrument(skip_all, fields(node = %node.name, node_type = %node.node_type()))]
    async fn execute(
        &self,
        node: &Node,
        ctx: &ExecutionContext,
        log: &mut NodeLog,
    ) -> Result<NodeOutput, NodeExecutionError> {
        node.config.validate()?;

        match &node.config {
            NodeConfig::Start(config) => {
                log.info(
                    "workflow started",
                    json!({ "variables": config.variables.keys().collect::<Vec<_>>() }),
                );
                Ok(NodeOutput::seed(config.variables.clone()))
            }
            NodeConfig::Trigger(config) => {
                debug!(cron = %config.cron_expression, "trigger passed through");
                log.info(
                    "trigger fired",
                    json!({ "cronExpression": config.cron_expression }),
                );
                Ok(NodeOutput::value(json!({ "cronExpression": config.cron_expression })))
            }
            NodeConfig::Event(config) => {
                log.info("event received", json!({ "eventTopic": config.event_topic }));
                Ok(NodeOutput::value(json!({ "eventTopic": config.event_topic })))
            }
            NodeConfig::HttpAuth(config) | NodeConfig::HttpAction(config) => {
                self.http
                    .execute(node.node_type(), config, ctx, &self.expressions, log)
                    .await
            }
            NodeConfig::CommandLine(config) => self.command.execute(config, log).await,
            NodeConfig::Condition(config) => {
                let expression = config.condition_expression.trim();
                let outcome = self.expressions.evaluate(expression, ctx)?;
                log.info(
                    format!("condition evaluated to {outcome}"),
                    json!({ "expression": expression, "result": outcome }),
                );
                Ok(NodeOutput::branch(outcome))
            }
            NodeConfig::End(_) => {
                log.info("workflow reached end", json!({}));
                Ok(NodeOutput::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use taskgraph_workflow::{ConditionConfig, EventConfig, StartConfig};

    fn condition(expression: &str) -> Node {
        Node::new(
            "check",
            NodeConfig::Condition(ConditionConfig {
                condition_expression: expression.to_string(),
            }),
        )
    }

    #[tokio::test]
    async fn start_seeds_variables() {
        let mut variables = Map::new();
        variables.insert("x".to_string(), json!(5));
        let node = Node::new(
            "start",
            NodeConfig::Start(StartConfig {
                name: String::new(),
                variables,
            }),
        );

        let mut log = NodeLog::new();
        let output = DefaultNodeExecutor::default()
            .execute(&node, &ExecutionContext::default(), &mut log)
            .await
            .unwrap();
        assert_eq!(output.variables["x"], 5);
    }

    #[tokio::test]
    async fn condition_reads_context() {
        let executor = DefaultNodeExecutor::default();
        let mut ctx = ExecutionContext::default();
        let mut variables = Map::new();
        variables.insert("x".to_string(), json!(-1));
        ctx.apply(
            &Node::new("start", NodeConfig::Start(StartConfig::default())),
            &NodeOutput::seed(variables),
        );

        let mut log = NodeLog::new();
        let output = executor
            .execute(&condition("x > 0"), &ctx, &mut log)
            .await
            .unwrap();
        assert_eq!(output.branch, Some(false));
    }

    #[tokio::test]
    async fn blank_condition_is_a_configuration_error() {
        let mut log = NodeLog::new();
        let result = DefaultNodeExecutor::default()
            .execute(&condition(" "), &ExecutionContext::default(), &mut log)
            .await;
        assert!(matches!(result, Err(NodeExecutionError::Configuration(_))));
    }

    #[tokio::test]
    async fn event_passes_topic_through() {
        let node = Node::new(
            "orders",
            NodeConfig::Event(EventConfig {
                event_topic: "orders.created".to_string(),
            }),
        );
        let mut log = NodeLog::new();
        let output = DefaultNodeExecutor::default()
            .execute(&node, &ExecutionContext::default(), &mut log)
            .await
            .unwrap();
        assert_eq!(output.value["eventTopic"], "orders.created");
        assert_eq!(output.branch, None);
    }
}
