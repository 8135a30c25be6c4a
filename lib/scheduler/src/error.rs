//! Error types for the scheduler crate.
//!
//! - `ScheduleError`: a cron expression cannot be used
//! - `SchedulerError`: a job could not be registered or queued
//! - `InvokeError`: a queued run could not be started

use std::fmt;
use taskgraph_core::WorkflowId;

/// Errors from cron schedule operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// Invalid cron expression.
    InvalidCronExpression { expression: String, reason: String },
    /// The expression has no future occurrence.
    NoUpcoming { expression: String },
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCronExpression { expression, reason } => {
                write!(f, "invalid cron expression '{expression}': {reason}")
            }
            Self::NoUpcoming { expression } => {
                write!(f, "cron expression '{expression}' never fires again")
            }
        }
    }
}

impl std::error::Error for ScheduleError {}

/// Errors from the job scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// The recurring schedule is unusable.
    Schedule(ScheduleError),
    /// The job queue is at capacity.
    QueueFull { capacity: usize },
    /// The scheduler has been shut down.
    ShutDown,
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Schedule(e) => write!(f, "{e}"),
            Self::QueueFull { capacity } => {
                write!(f, "job queue is full ({capacity} jobs waiting)")
            }
            Self::ShutDown => write!(f, "scheduler is shut down"),
        }
    }
}

impl std::error::Error for SchedulerError {}

impl From<ScheduleError> for SchedulerError {
    fn from(e: ScheduleError) -> Self {
        Self::Schedule(e)
    }
}

/// Errors starting a workflow run from the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvokeError {
    /// The workflow no longer exists.
    WorkflowNotFound { workflow_id: WorkflowId },
    /// Loading the workflow or recording the run failed.
    Failed { reason: String },
}

impl fmt::Display for InvokeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkflowNotFound { workflow_id } => {
                write!(f, "workflow not found: {workflow_id}")
            }
            Self::Failed { reason } => write!(f, "workflow invocation failed: {reason}"),
        }
    }
}

impl std::error::Error for InvokeError {}
