//! Workflow graph engine for taskgraph.
//!
//! This crate provides the pure, I/O-free half of the engine:
//!
//! - **Graph Model**: workflows owning an arena of typed nodes and edges
//! - **Graph Validator**: cycle detection, ownership, content and port checks, plus lint warnings
//! - **Topological Scheduler**: static order and the branch-pruning execution plan
//! - **Graph Serializer**: lossless XML interchange documents with identity re-minting on import
//! - **Run records**: runs, per-node records, log entries and progress events

pub mod curl;
pub mod definition;
pub mod edge;
pub mod error;
pub mod execution;
pub mod graph;
pub mod node;
pub mod plan;
pub mod validate;
pub mod xml;

pub use curl::{CurlRequest, parse_curl};
pub use definition::{Workflow, WorkflowMetadata, WorkflowSummary};
pub use edge::{Edge, FALSE_PORT, TRUE_PORT};
pub use error::{ConfigurationError, ExecutionError, ExportError, GraphError, ImportError};
pub use execution::{
    LogEntry, LogLevel, NodeRun, NodeStatus, ProgressEvent, ProgressKind, RunRequest, RunStatus,
    WorkflowRun,
};
pub use graph::WorkflowGraph;
pub use node::{
    AuthSettings, AuthType, CommandLineConfig, ConditionConfig, EndConfig, EventConfig,
    HttpRequestConfig, Node, NodeCategory, NodeConfig, NodeType, Position, ResolvedRequest,
    StartConfig, TriggerConfig,
};
pub use plan::{ExecutionPlan, static_order};
pub use validate::{ValidationReport, ValidationWarning, find_cycle, lint, validate};
