//! Node execution and the run driver for taskgraph workflows.
//!
//! - [`NodeExecutor`] runs a single node; [`DefaultNodeExecutor`] covers
//!   every built-in node type
//! - [`WorkflowRunner`] walks an execution plan, recording runs in a
//!   [`RunJournal`] and publishing to a [`ProgressSink`]

pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod expression;
pub mod http;
pub mod journal;
pub mod log;
pub mod progress;
pub mod runner;

pub use command::CommandExecutor;
pub use config::ExecutorConfig;
pub use context::{ExecutionContext, NodeOutput};
pub use error::{JournalError, NodeExecutionError};
pub use executor::{DefaultNodeExecutor, NodeExecutor};
pub use expression::{ExpressionEngine, ResponseView};
pub use http::HttpExecutor;
pub use journal::{InMemoryJournal, RunJournal};
pub use log::{NodeLog, NodeLogLine};
pub use progress::{BroadcastProgress, NoProgress, ProgressSink};
pub use runner::{RunError, RunReport, WorkflowRunner};
