//! Daemon error types.
//!
//! Library failures arrive as reports and get a [`CliError`] layered on top
//! with `.context()`, so the full chain prints at exit.

use std::fmt;
use std::path::Path;
use taskgraph_executor::JournalError;
use taskgraph_workflow::ImportError;

/// Errors surfaced by a daemon command.
#[derive(Debug)]
pub enum CliError {
    /// The environment configuration is invalid.
    Config { reason: String },
    /// A store-backed command ran without `DATABASE_URL`.
    MissingDatabaseUrl,
    /// The database could not be reached or migrated.
    Database { reason: String },
    /// A file could not be read or written.
    Io { path: String, reason: String },
    /// Command output could not be written.
    Output { reason: String },
    /// A document was refused.
    Document(ImportError),
    /// A store operation failed.
    Store,
    /// A run could not be recorded.
    Run,
    /// Run records could not be read.
    Journal(JournalError),
    /// The scheduler refused a registration.
    Scheduler,
}

impl CliError {
    pub fn io(path: &Path, error: &std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            reason: error.to_string(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { reason } => write!(f, "invalid configuration: {reason}"),
            Self::MissingDatabaseUrl => write!(f, "DATABASE_URL is not set"),
            Self::Database { reason } => write!(f, "database error: {reason}"),
            Self::Io { path, reason } => write!(f, "{path}: {reason}"),
            Self::Output { reason } => write!(f, "failed to write output: {reason}"),
            Self::Document(e) => write!(f, "{e}"),
            Self::Store => write!(f, "workflow store operation failed"),
            Self::Run => write!(f, "workflow run could not be recorded"),
            Self::Journal(e) => write!(f, "{e}"),
            Self::Scheduler => write!(f, "scheduler operation failed"),
        }
    }
}

impl std::error::Error for CliError {}

impl From<ImportError> for CliError {
    fn from(e: ImportError) -> Self {
        Self::Document(e)
    }
}

impl From<JournalError> for CliError {
    fn from(e: JournalError) -> Self {
        Self::Journal(e)
    }
}

impl From<config::ConfigError> for CliError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config {
            reason: e.to_string(),
        }
    }
}

impl From<sqlx::Error> for CliError {
    fn from(e: sqlx::Error) -> Self {
        Self::Database {
            reason: e.to_string(),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for CliError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        Self::Database {
            reason: e.to_string(),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        Self::Output {
            reason: e.to_string(),
        }
    }
}
