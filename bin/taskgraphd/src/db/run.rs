//! PostgreSQL-backed run journal.
//!
//! Runs are upserted into `workflow_runs`, node records into `node_runs`, and
//! the log trail is appended to `run_logs`. Reads go by business ID or job type.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use taskgraph_core::{LogEntryId, NodeId, WorkflowId, WorkflowRunId};
use taskgraph_executor::{JournalError, RunJournal};
use taskgraph_workflow::{LogEntry, LogLevel, NodeRun, RunStatus, WorkflowRun};

fn write_failed(e: sqlx::Error) -> JournalError {
    JournalError::WriteFailed {
        message: e.to_string(),
    }
}

fn read_failed(e: sqlx::Error) -> JournalError {
    JournalError::ReadFailed {
        message: e.to_string(),
    }
}

fn invalid(what: &str, value: &str, reason: impl std::fmt::Display) -> JournalError {
    JournalError::ReadFailed {
        message: format!("invalid {what} '{value}': {reason}"),
    }
}

/// Row type for run queries.
#[derive(FromRow)]
struct RunRow {
    id: String,
    workflow_id: String,
    workflow_version: i64,
    business_id: String,
    job_type: String,
    description: Option<String>,
    parameters: serde_json::Value,
    status: String,
    error: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl RunRow {
    fn try_into_run(self) -> Result<WorkflowRun, JournalError> {
        let id = WorkflowRunId::from_str(&self.id).map_err(|e| invalid("run id", &self.id, e))?;
        let workflow_id = WorkflowId::from_str(&self.workflow_id)
            .map_err(|e| invalid("workflow id", &self.workflow_id, e))?;
        let workflow_version = u64::try_from(self.workflow_version)
            .map_err(|e| invalid("workflow version", &self.workflow_version.to_string(), e))?;
        let status = RunStatus::from_storage(&self.status)
            .ok_or_else(|| invalid("run status", &self.status, "unknown status"))?;
        let serde_json::Value::Object(parameters) = self.parameters else {
            return Err(invalid("parameters of run", &self.id, "not a JSON object"));
        };

        Ok(WorkflowRun {
            id,
            workflow_id,
            workflow_version,
            business_id: self.business_id,
            job_type: self.job_type,
            description: self.description,
            parameters,
            status,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            error: self.error,
        })
    }
}

/// Row type for log queries.
#[derive(FromRow)]
struct LogRow {
    id: String,
    run_id: String,
    node_id: Option<String>,
    step: String,
    level: String,
    message: String,
    details: Option<serde_json::Value>,
    logged_at: DateTime<Utc>,
}

impl LogRow {
    fn try_into_entry(self) -> Result<LogEntry, JournalError> {
        let id = LogEntryId::from_str(&self.id).map_err(|e| invalid("log id", &self.id, e))?;
        let run_id =
            WorkflowRunId::from_str(&self.run_id).map_err(|e| invalid("run id", &self.run_id, e))?;
        let node_id = self
            .node_id
            .as_deref()
            .map(|raw| NodeId::from_str(raw).map_err(|e| invalid("node id", raw, e)))
            .transpose()?;
        let level = LogLevel::from_storage(&self.level)
            .ok_or_else(|| invalid("log level", &self.level, "unknown level"))?;

        Ok(LogEntry {
            id,
            run_id,
            node_id,
            step: self.step,
            level,
            message: self.message,
            details: self.details,
            timestamp: self.logged_at,
        })
    }
}

/// [`RunJournal`] writing to `workflow_runs`, `node_runs` and `run_logs`.
#[derive(Debug, Clone)]
pub struct PgRunJournal {
    pool: PgPool,
}

impl PgRunJournal {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunJournal for PgRunJournal {
    async fn record_run(&self, run: &WorkflowRun) -> Result<(), JournalError> {
        let version = i64::try_from(run.workflow_version).map_err(|e| JournalError::WriteFailed {
            message: format!("workflow version out of range: {e}"),
        })?;
        let parameters = serde_json::Value::Object(run.parameters.clone());

        sqlx::query(
            r#"
            INSERT INTO workflow_runs
                (id, workflow_id, workflow_version, business_id, job_type, description,
                 parameters, status, error, created_at, started_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO UPDATE
            SET status = EXCLUDED.status,
                error = EXCLUDED.error,
                started_at = EXCLUDED.started_at,
                finished_at = EXCLUDED.finished_at
            "#,
        )
        .bind(run.id.to_string())
        .bind(run.workflow_id.to_string())
        .bind(version)
        .bind(&run.business_id)
        .bind(&run.job_type)
        .bind(&run.description)
        .bind(parameters)
        .bind(run.status.as_str())
        .bind(&run.error)
        .bind(run.created_at)
        .bind(run.started_at)
        .bind(run.finished_at)
        .execute(&self.pool)
        .await
        .map_err(write_failed)?;

        Ok(())
    }

    async fn record_node(&self, node: &NodeRun) -> Result<(), JournalError> {
        sqlx::query(
            r#"
            INSERT INTO node_runs
                (run_id, node_id, node_name, node_type, status, output, error,
                 started_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (run_id, node_id) DO UPDATE
            SET status = EXCLUDED.status,
                output = EXCLUDED.output,
                error = EXCLUDED.error,
                started_at = EXCLUDED.started_at,
                finished_at = EXCLUDED.finished_at
            "#,
        )
        .bind(node.run_id.to_string())
        .bind(node.node_id.to_string())
        .bind(&node.node_name)
        .bind(node.node_type.as_str())
        .bind(node.status.as_str())
        .bind(&node.output)
        .bind(&node.error)
        .bind(node.started_at)
        .bind(node.finished_at)
        .execute(&self.pool)
        .await
        .map_err(write_failed)?;

        Ok(())
    }

    async fn append_log(&self, entry: &LogEntry) -> Result<(), JournalError> {
        sqlx::query(
            r#"
            INSERT INTO run_logs
                (id, run_id, node_id, step, level, message, details, logged_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(entry.run_id.to_string())
        .bind(entry.node_id.map(|id| id.to_string()))
        .bind(&entry.step)
        .bind(entry.level.as_str())
        .bind(&entry.message)
        .bind(&entry.details)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await
        .map_err(write_failed)?;

        Ok(())
    }

    async fn find_run_by_business_id(
        &self,
        business_id: &str,
    ) -> Result<Option<WorkflowRun>, JournalError> {
        let row: Option<RunRow> = sqlx::query_as(
            r#"
            SELECT id, workflow_id, workflow_version, business_id, job_type, description,
                   parameters, status, error, created_at, started_at, finished_at
            FROM workflow_runs
            WHERE business_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(business_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(read_failed)?;

        row.map(RunRow::try_into_run).transpose()
    }

    async fn logs_for_business_id(&self, business_id: &str) -> Result<Vec<LogEntry>, JournalError> {
        let rows: Vec<LogRow> = sqlx::query_as(
            r#"
            SELECT l.id, l.run_id, l.node_id, l.step, l.level, l.message, l.details, l.logged_at
            FROM run_logs l
            JOIN workflow_runs r ON r.id = l.run_id
            WHERE r.business_id = $1
            ORDER BY l.logged_at, l.id
            "#,
        )
        .bind(business_id)
        .fetch_all(&self.pool)
        .await
        .map_err(read_failed)?;

        rows.into_iter().map(LogRow::try_into_entry).collect()
    }

    async fn runs_by_job_type(&self, job_type: &str) -> Result<Vec<WorkflowRun>, JournalError> {
        let rows: Vec<RunRow> = sqlx::query_as(
            r#"
            SELECT id, workflow_id, workflow_version, business_id, job_type, description,
                   parameters, status, error, created_at, started_at, finished_at
            FROM workflow_runs
            WHERE job_type = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(job_type)
        .fetch_all(&self.pool)
        .await
        .map_err(read_failed)?;

        rows.into_iter().map(RunRow::try_into_run).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run_row() -> RunRow {
        RunRow {
            id: WorkflowRunId::new().to_string(),
            workflow_id: WorkflowId::new().to_string(),
            workflow_version: 3,
            business_id: "order-42".to_string(),
            job_type: "sync".to_string(),
            description: None,
            parameters: json!({"order": 42}),
            status: "failed".to_string(),
            error: Some("node 'store' failed".to_string()),
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            finished_at: Some(Utc::now()),
        }
    }

    #[test]
    fn run_row_decodes() {
        let run = run_row().try_into_run().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.workflow_version, 3);
        assert_eq!(run.parameters["order"], 42);
    }

    #[test]
    fn run_row_rejects_unknown_status_and_non_object_parameters() {
        let mut row = run_row();
        row.status = "exploded".to_string();
        assert!(matches!(
            row.try_into_run(),
            Err(JournalError::ReadFailed { .. })
        ));

        let mut row = run_row();
        row.parameters = json!([1, 2]);
        assert!(row.try_into_run().is_err());
    }

    #[test]
    fn log_row_decodes_optional_node() {
        let node_id = NodeId::new();
        let row = LogRow {
            id: LogEntryId::new().to_string(),
            run_id: WorkflowRunId::new().to_string(),
            node_id: Some(node_id.to_string()),
            step: "fetch".to_string(),
            level: "Warning".to_string(),
            message: "slow response".to_string(),
            details: Some(json!({"durationMs": 2300})),
            logged_at: Utc::now(),
        };
        let entry = row.try_into_entry().unwrap();
        assert_eq!(entry.node_id, Some(node_id));
        assert_eq!(entry.level, LogLevel::Warning);

        let row = LogRow {
            id: LogEntryId::new().to_string(),
            run_id: WorkflowRunId::new().to_string(),
            node_id: Some("edge_01J0000000000000000000000".to_string()),
            step: "fetch".to_string(),
            level: "Info".to_string(),
            message: "x".to_string(),
            details: None,
            logged_at: Utc::now(),
        };
        assert!(row.try_into_entry().is_err());
    }
}
