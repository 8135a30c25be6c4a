//! The job scheduler contract and the invoker it calls.

use crate::error::{InvokeError, SchedulerError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rootcause::prelude::Report;
use taskgraph_core::{JobId, WorkflowId};
use taskgraph_workflow::{RunRequest, RunStatus};

/// Job type of runs started by a recurring schedule.
pub const SCHEDULED_JOB_TYPE: &str = "scheduled";

/// Executes the latest stored graph of a workflow.
#[async_trait]
pub trait WorkflowInvoker: Send + Sync {
    /// Runs the workflow and returns the final run status.
    async fn invoke(
        &self,
        workflow_id: WorkflowId,
        request: RunRequest,
    ) -> Result<RunStatus, InvokeError>;

    /// Called when a recurring schedule fires, with the time it fired and the
    /// next time it will fire.
    async fn schedule_fired(
        &self,
        _workflow_id: WorkflowId,
        _fired_at: DateTime<Utc>,
        _next: Option<DateTime<Utc>>,
    ) {
    }
}

/// Registers recurring runs and queues one-shot runs.
#[async_trait]
pub trait JobScheduler: Send + Sync {
    /// Registers or replaces the recurring schedule of a workflow, returning
    /// when it next fires.
    async fn register_recurring(
        &self,
        workflow_id: WorkflowId,
        cron_expression: &str,
    ) -> Result<DateTime<Utc>, Report<SchedulerError>>;

    /// Removes a recurring schedule, returning whether one existed.
    async fn unregister(&self, workflow_id: WorkflowId) -> bool;

    /// Queues a run for immediate execution.
    async fn enqueue(
        &self,
        workflow_id: WorkflowId,
        request: RunRequest,
    ) -> Result<JobId, Report<SchedulerError>>;

    /// Removes a queued run. Returns false if it already started or is
    /// unknown.
    async fn cancel(&self, job_id: JobId) -> bool;
}
