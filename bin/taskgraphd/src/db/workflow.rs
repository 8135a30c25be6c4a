//! PostgreSQL-backed workflow store.
//!
//! Each workflow is a row in `workflows` plus its graph in `workflow_nodes`
//! and `workflow_edges`. Replacing a workflow rewrites the graph rows inside
//! one transaction, after locking the workflow row and checking its version.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rootcause::prelude::Report;
use sqlx::{FromRow, PgConnection, PgPool};
use std::str::FromStr;
use taskgraph_core::{EdgeId, NodeId, WorkflowId};
use taskgraph_store::{StoreError, WorkflowRecord, WorkflowStore};
use taskgraph_workflow::{
    Edge, Node, NodeConfig, NodeType, Position, Workflow, WorkflowGraph, WorkflowMetadata,
    WorkflowSummary,
};
use tracing::debug;

fn decode_error(what: &str, value: &str, reason: impl std::fmt::Display) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("invalid {what} '{value}': {reason}"),
    )))
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend {
        reason: e.to_string(),
    }
}

fn to_db_version(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version).map_err(|e| StoreError::Backend {
        reason: format!("version {version} out of range: {e}"),
    })
}

fn to_db_ordinal(index: usize) -> Result<i32, sqlx::Error> {
    i32::try_from(index).map_err(|e| decode_error("ordinal", &index.to_string(), e))
}

/// Row type for workflow queries.
#[derive(FromRow)]
struct WorkflowRow {
    id: String,
    name: String,
    description: Option<String>,
    version: i64,
    active: bool,
    cron_expression: Option<String>,
    enable_schedule: bool,
    last_execution_at: Option<DateTime<Utc>>,
    next_execution_at: Option<DateTime<Utc>>,
    snapshot: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl WorkflowRow {
    fn try_into_parts(self) -> Result<(WorkflowId, WorkflowMetadata, String), sqlx::Error> {
        let id = WorkflowId::from_str(&self.id)
            .map_err(|e| decode_error("workflow id", &self.id, e))?;
        let version = u64::try_from(self.version)
            .map_err(|e| decode_error("version", &self.version.to_string(), e))?;

        let metadata = WorkflowMetadata {
            name: self.name,
            description: self.description,
            version,
            active: self.active,
            cron_expression: self.cron_expression,
            enable_schedule: self.enable_schedule,
            last_execution_at: self.last_execution_at,
            next_execution_at: self.next_execution_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        };
        Ok((id, metadata, self.snapshot))
    }
}

/// Row type for node queries.
#[derive(FromRow)]
struct NodeRow {
    id: String,
    workflow_id: String,
    node_type: String,
    name: String,
    description: Option<String>,
    configuration: serde_json::Value,
    position_x: f64,
    position_y: f64,
    style: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl NodeRow {
    fn try_into_node(self) -> Result<Node, sqlx::Error> {
        let id = NodeId::from_str(&self.id).map_err(|e| decode_error("node id", &self.id, e))?;
        let workflow_id = WorkflowId::from_str(&self.workflow_id)
            .map_err(|e| decode_error("workflow id", &self.workflow_id, e))?;
        let node_type = NodeType::from_str(&self.node_type)
            .map_err(|e| decode_error("node type", &self.node_type, e))?;
        let config = NodeConfig::from_json(node_type, self.configuration)
            .map_err(|e| decode_error("configuration of node", &self.id, e))?;

        Ok(Node {
            id,
            workflow_id: Some(workflow_id),
            name: self.name,
            description: self.description,
            config,
            position: Position {
                x: self.position_x,
                y: self.position_y,
            },
            style: self.style,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Row type for edge queries.
#[derive(FromRow)]
struct EdgeRow {
    id: String,
    workflow_id: String,
    source_node_id: String,
    target_node_id: String,
    port: Option<String>,
    condition: Option<String>,
    priority: i32,
    style: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl EdgeRow {
    fn try_into_edge(self) -> Result<Edge, sqlx::Error> {
        let id = EdgeId::from_str(&self.id).map_err(|e| decode_error("edge id", &self.id, e))?;
        let workflow_id = WorkflowId::from_str(&self.workflow_id)
            .map_err(|e| decode_error("workflow id", &self.workflow_id, e))?;
        let source = NodeId::from_str(&self.source_node_id)
            .map_err(|e| decode_error("node id", &self.source_node_id, e))?;
        let target = NodeId::from_str(&self.target_node_id)
            .map_err(|e| decode_error("node id", &self.target_node_id, e))?;

        Ok(Edge {
            id,
            workflow_id: Some(workflow_id),
            source,
            target,
            port: self.port,
            condition: self.condition,
            priority: self.priority,
            style: self.style,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Row type for workflow listings.
#[derive(FromRow)]
struct SummaryRow {
    id: String,
    name: String,
    description: Option<String>,
    version: i64,
    active: bool,
    cron_expression: Option<String>,
    enable_schedule: bool,
    node_count: i64,
    edge_count: i64,
    updated_at: DateTime<Utc>,
}

impl SummaryRow {
    fn try_into_summary(self) -> Result<WorkflowSummary, sqlx::Error> {
        let id = WorkflowId::from_str(&self.id)
            .map_err(|e| decode_error("workflow id", &self.id, e))?;
        let count = |n: i64| usize::try_from(n).map_err(|e| decode_error("count", &n.to_string(), e));

        Ok(WorkflowSummary {
            id,
            name: self.name,
            description: self.description,
            version: u64::try_from(self.version)
                .map_err(|e| decode_error("version", &self.version.to_string(), e))?,
            active: self.active,
            cron_expression: self.cron_expression,
            enable_schedule: self.enable_schedule,
            node_count: count(self.node_count)?,
            edge_count: count(self.edge_count)?,
            updated_at: self.updated_at,
        })
    }
}

/// [`WorkflowStore`] over a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgWorkflowStore {
    pool: PgPool,
}

impl PgWorkflowStore {
    /// Creates a new store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_graph(&self, id: WorkflowId) -> Result<WorkflowGraph, sqlx::Error> {
        let nodes: Vec<NodeRow> = sqlx::query_as(
            r#"
            SELECT id, workflow_id, node_type, name, description, configuration,
                   position_x, position_y, style, created_at, updated_at
            FROM workflow_nodes
            WHERE workflow_id = $1
            ORDER BY ordinal
            "#,
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let edges: Vec<EdgeRow> = sqlx::query_as(
            r#"
            SELECT id, workflow_id, source_node_id, target_node_id, port, condition,
                   priority, style, created_at, updated_at
            FROM workflow_edges
            WHERE workflow_id = $1
            ORDER BY ordinal
            "#,
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut graph = WorkflowGraph::new();
        for row in nodes {
            let node = row.try_into_node()?;
            let node_id = node.id.to_string();
            graph
                .add_node(node)
                .map_err(|e| decode_error("node", &node_id, e))?;
        }
        for row in edges {
            let edge = row.try_into_edge()?;
            let edge_id = edge.id.to_string();
            graph
                .add_edge(edge)
                .map_err(|e| decode_error("edge", &edge_id, e))?;
        }
        Ok(graph)
    }
}

/// Writes every node and edge of `workflow`, in insertion order.
async fn insert_graph(conn: &mut PgConnection, workflow: &Workflow) -> Result<(), sqlx::Error> {
    let workflow_id = workflow.id.to_string();

    for (index, node) in workflow.graph.nodes().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO workflow_nodes
                (id, workflow_id, ordinal, node_type, name, description, configuration,
                 position_x, position_y, style, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(node.id.to_string())
        .bind(&workflow_id)
        .bind(to_db_ordinal(index)?)
        .bind(node.node_type().as_str())
        .bind(&node.name)
        .bind(&node.description)
        .bind(node.config.to_json())
        .bind(node.position.x)
        .bind(node.position.y)
        .bind(&node.style)
        .bind(node.created_at)
        .bind(node.updated_at)
        .execute(&mut *conn)
        .await?;
    }

    for (index, edge) in workflow.graph.edges().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO workflow_edges
                (id, workflow_id, ordinal, source_node_id, target_node_id, port, condition,
                 priority, style, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(edge.id.to_string())
        .bind(&workflow_id)
        .bind(to_db_ordinal(index)?)
        .bind(edge.source.to_string())
        .bind(edge.target.to_string())
        .bind(&edge.port)
        .bind(&edge.condition)
        .bind(edge.priority)
        .bind(&edge.style)
        .bind(edge.created_at)
        .bind(edge.updated_at)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

#[async_trait]
impl WorkflowStore for PgWorkflowStore {
    async fn insert(&self, record: &WorkflowRecord) -> Result<(), Report<StoreError>> {
        let workflow = &record.workflow;
        let meta = &workflow.metadata;
        let version = to_db_version(meta.version)?;
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO workflows
                (id, name, description, version, active, cron_expression, enable_schedule,
                 last_execution_at, next_execution_at, snapshot, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(workflow.id.to_string())
        .bind(&meta.name)
        .bind(&meta.description)
        .bind(version)
        .bind(meta.active)
        .bind(&meta.cron_expression)
        .bind(meta.enable_schedule)
        .bind(meta.last_execution_at)
        .bind(meta.next_execution_at)
        .bind(&record.snapshot)
        .bind(meta.created_at)
        .bind(meta.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        if inserted.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists {
                workflow_id: workflow.id,
            }
            .into());
        }

        insert_graph(&mut tx, workflow).await.map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        debug!(workflow_id = %workflow.id, "workflow row inserted");
        Ok(())
    }

    async fn find(&self, id: WorkflowId) -> Result<Option<WorkflowRecord>, Report<StoreError>> {
        let row: Option<WorkflowRow> = sqlx::query_as(
            r#"
            SELECT id, name, description, version, active, cron_expression, enable_schedule,
                   last_execution_at, next_execution_at, snapshot, created_at, updated_at
            FROM workflows
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let (id, metadata, snapshot) = row.try_into_parts().map_err(backend)?;
        let graph = self.load_graph(id).await.map_err(backend)?;

        Ok(Some(WorkflowRecord {
            workflow: Workflow {
                id,
                metadata,
                graph,
            },
            snapshot,
        }))
    }

    async fn list(&self, active_only: bool) -> Result<Vec<WorkflowSummary>, Report<StoreError>> {
        let rows: Vec<SummaryRow> = sqlx::query_as(
            r#"
            SELECT
                w.id,
                w.name,
                w.description,
                w.version,
                w.active,
                w.cron_expression,
                w.enable_schedule,
                (SELECT COUNT(*) FROM workflow_nodes n WHERE n.workflow_id = w.id) AS node_count,
                (SELECT COUNT(*) FROM workflow_edges e WHERE e.workflow_id = w.id) AS edge_count,
                w.updated_at
            FROM workflows w
            WHERE w.active OR NOT $1
            ORDER BY w.name, w.id
            "#,
        )
        .bind(active_only)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let summaries = rows
            .into_iter()
            .map(SummaryRow::try_into_summary)
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)?;
        Ok(summaries)
    }

    async fn replace(
        &self,
        record: &WorkflowRecord,
        expected_version: u64,
    ) -> Result<(), Report<StoreError>> {
        let workflow = &record.workflow;
        let meta = &workflow.metadata;
        let version = to_db_version(meta.version)?;
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let current: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT version
            FROM workflows
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(workflow.id.to_string())
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?;

        let Some((actual,)) = current else {
            return Err(StoreError::NotFound {
                workflow_id: workflow.id,
            }
            .into());
        };
        if actual != to_db_version(expected_version)? {
            return Err(StoreError::VersionConflict {
                workflow_id: workflow.id,
                expected: expected_version,
                actual: u64::try_from(actual).unwrap_or_default(),
            }
            .into());
        }

        sqlx::query(
            r#"
            UPDATE workflows
            SET name = $2, description = $3, version = $4, active = $5, cron_expression = $6,
                enable_schedule = $7, last_execution_at = $8, next_execution_at = $9,
                snapshot = $10, updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(workflow.id.to_string())
        .bind(&meta.name)
        .bind(&meta.description)
        .bind(version)
        .bind(meta.active)
        .bind(&meta.cron_expression)
        .bind(meta.enable_schedule)
        .bind(meta.last_execution_at)
        .bind(meta.next_execution_at)
        .bind(&record.snapshot)
        .bind(meta.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        // Edges first: they reference the node rows.
        sqlx::query("DELETE FROM workflow_edges WHERE workflow_id = $1")
            .bind(workflow.id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        sqlx::query("DELETE FROM workflow_nodes WHERE workflow_id = $1")
            .bind(workflow.id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        insert_graph(&mut tx, workflow).await.map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        debug!(workflow_id = %workflow.id, version = meta.version, "workflow rows replaced");
        Ok(())
    }

    async fn delete(&self, id: WorkflowId) -> Result<bool, Report<StoreError>> {
        let result = sqlx::query(
            r#"
            DELETE FROM workflows
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskgraph_workflow::{EndConfig, StartConfig};

    #[test]
    fn node_row_decodes_typed_configuration() {
        let workflow_id = WorkflowId::new();
        let node_id = NodeId::new();
        let row = NodeRow {
            id: node_id.to_string(),
            workflow_id: workflow_id.to_string(),
            node_type: "CommandLine".to_string(),
            name: "build".to_string(),
            description: None,
            configuration: serde_json::json!({"command": "make"}),
            position_x: 10.0,
            position_y: 20.0,
            style: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let node = row.try_into_node().unwrap();
        assert_eq!(node.id, node_id);
        assert_eq!(node.workflow_id, Some(workflow_id));
        assert_eq!(node.node_type(), NodeType::CommandLine);
        assert_eq!(node.position, Position { x: 10.0, y: 20.0 });
    }

    #[test]
    fn node_row_with_unknown_type_is_decode_error() {
        let row = NodeRow {
            id: NodeId::new().to_string(),
            workflow_id: WorkflowId::new().to_string(),
            node_type: "Teleport".to_string(),
            name: "x".to_string(),
            description: None,
            configuration: serde_json::Value::Null,
            position_x: 0.0,
            position_y: 0.0,
            style: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert!(matches!(row.try_into_node(), Err(sqlx::Error::Decode(_))));
    }

    #[test]
    fn workflow_row_rejects_negative_version() {
        let row = WorkflowRow {
            id: WorkflowId::new().to_string(),
            name: "w".to_string(),
            description: None,
            version: -1,
            active: true,
            cron_expression: None,
            enable_schedule: false,
            last_execution_at: None,
            next_execution_at: None,
            snapshot: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert!(row.try_into_parts().is_err());
    }

    #[test]
    fn edge_row_keeps_port_and_priority() {
        let mut workflow = Workflow::new("rows");
        let a = workflow
            .add_node(Node::new("a", NodeConfig::Start(StartConfig::default())))
            .unwrap();
        let b = workflow
            .add_node(Node::new("b", NodeConfig::End(EndConfig {})))
            .unwrap();
        let row = EdgeRow {
            id: EdgeId::new().to_string(),
            workflow_id: workflow.id.to_string(),
            source_node_id: a.to_string(),
            target_node_id: b.to_string(),
            port: Some("true".to_string()),
            condition: None,
            priority: 3,
            style: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let edge = row.try_into_edge().unwrap();
        assert_eq!((edge.source, edge.target), (a, b));
        assert_eq!(edge.port.as_deref(), Some("true"));
        assert_eq!(edge.priority, 3);
    }
}
