//! Core types shared across the taskgraph workspace.
//!
//! This crate provides the strongly-typed identifiers minted for every
//! workflow entity and the `Result` alias used at service boundaries.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{EdgeId, JobId, LogEntryId, NodeId, ParseIdError, WorkflowId, WorkflowRunId};
