//! Workflow persistence for taskgraph.
//!
//! [`WorkflowStore`] is the storage seam; [`WorkflowService`] applies graph
//! mutations on top of it with validation and version checks.

pub mod error;
pub mod service;
pub mod store;

pub use error::StoreError;
pub use service::{WorkflowPatch, WorkflowService};
pub use store::{InMemoryWorkflowStore, WorkflowRecord, WorkflowStore};
