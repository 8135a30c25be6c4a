//! Database repositories for taskgraph.
//!
//! - Workflows and their graphs
//! - Run records, node records and the log trail

pub mod run;
pub mod workflow;

pub use run::PgRunJournal;
pub use workflow::PgWorkflowStore;
