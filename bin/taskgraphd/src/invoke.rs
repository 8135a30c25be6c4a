//! Bridges the scheduler to stored workflows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use taskgraph_core::WorkflowId;
use taskgraph_executor::WorkflowRunner;
use taskgraph_scheduler::{InvokeError, WorkflowInvoker};
use taskgraph_store::{StoreError, WorkflowService};
use taskgraph_workflow::{RunRequest, RunStatus};
use tracing::{info, warn};

/// Loads the latest stored graph of a workflow and runs it.
pub struct StoreInvoker {
    service: WorkflowService,
    runner: Arc<WorkflowRunner>,
}

impl StoreInvoker {
    pub fn new(service: WorkflowService, runner: Arc<WorkflowRunner>) -> Self {
        Self { service, runner }
    }
}

#[async_trait]
impl WorkflowInvoker for StoreInvoker {
    async fn invoke(
        &self,
        workflow_id: WorkflowId,
        request: RunRequest,
    ) -> Result<RunStatus, InvokeError> {
        let workflow = match self.service.get_workflow(workflow_id).await {
            Ok(workflow) => workflow,
            Err(report) => {
                return Err(match report.current_context() {
                    StoreError::NotFound { .. } => InvokeError::WorkflowNotFound { workflow_id },
                    other => InvokeError::Failed {
                        reason: other.to_string(),
                    },
                });
            }
        };

        if !workflow.is_active() {
            info!(workflow_id = %workflow_id, "workflow inactive, run skipped");
            return Ok(RunStatus::Cancelled);
        }

        let report = self
            .runner
            .run(&workflow, request)
            .await
            .map_err(|report| InvokeError::Failed {
                reason: report.current_context().to_string(),
            })?;
        Ok(report.run.status)
    }

    async fn schedule_fired(
        &self,
        workflow_id: WorkflowId,
        fired_at: DateTime<Utc>,
        next: Option<DateTime<Utc>>,
    ) {
        if let Err(report) = self
            .service
            .record_schedule(workflow_id, Some(fired_at), next)
            .await
        {
            warn!(
                workflow_id = %workflow_id,
                error = %report.current_context(),
                "failed to record schedule times"
            );
        }
    }
}
