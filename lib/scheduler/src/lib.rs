//! Scheduling for taskgraph workflow runs.
//!
//! - [`CronSchedule`]: cron expression parsing and evaluation
//! - [`JobScheduler`]: recurring registration, one-shot queue and
//!   cancel-before-start
//! - [`TokioJobScheduler`]: the in-process implementation, calling a
//!   [`WorkflowInvoker`] for each run

pub mod config;
pub mod error;
pub mod job;
pub mod queue;
pub mod schedule;

pub use config::SchedulerConfig;
pub use error::{InvokeError, ScheduleError, SchedulerError};
pub use job::{JobScheduler, SCHEDULED_JOB_TYPE, WorkflowInvoker};
pub use queue::TokioJobScheduler;
pub use schedule::CronSchedule;
