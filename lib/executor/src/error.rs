//! Error types for node execution and run bookkeeping.

use std::fmt;
use taskgraph_workflow::ConfigurationError;

/// Errors from executing a single node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeExecutionError {
    /// The node's configuration cannot be executed.
    Configuration(ConfigurationError),
    /// The HTTP request could not be sent or its response read.
    Request { message: String },
    /// The call did not finish in time.
    Timeout { seconds: u64 },
    /// The response status was not 2xx.
    HttpStatus { status: u16, url: String },
    /// The assertion expression evaluated to false.
    AssertionFailed { expression: String },
    /// An expression could not be evaluated.
    Expression { expression: String, message: String },
    /// The command could not be started.
    CommandSpawn { message: String },
    /// The command exited unsuccessfully; `None` if killed by a signal.
    CommandFailed { exit_code: Option<i32> },
}

impl fmt::Display for NodeExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(e) => write!(f, "{e}"),
            Self::Request { message } => write!(f, "request failed: {message}"),
            Self::Timeout { seconds } => write!(f, "timed out after {seconds}s"),
            Self::HttpStatus { status, url } => {
                write!(f, "HTTP status {status} from {url}")
            }
            Self::AssertionFailed { expression } => {
                write!(f, "assertion failed: {expression}")
            }
            Self::Expression {
                expression,
                message,
            } => write!(f, "cannot evaluate '{expression}': {message}"),
            Self::CommandSpawn { message } => write!(f, "failed to start command: {message}"),
            Self::CommandFailed {
                exit_code: Some(code),
            } => write!(f, "command exited with code {code}"),
            Self::CommandFailed { exit_code: None } => {
                write!(f, "command terminated by signal")
            }
        }
    }
}

impl std::error::Error for NodeExecutionError {}

impl From<ConfigurationError> for NodeExecutionError {
    fn from(e: ConfigurationError) -> Self {
        Self::Configuration(e)
    }
}

/// Errors reading or writing a run journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalError {
    /// The record could not be stored.
    WriteFailed { message: String },
    /// Stored records could not be read back.
    ReadFailed { message: String },
}

impl fmt::Display for JournalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WriteFailed { message } => write!(f, "run journal write failed: {message}"),
            Self::ReadFailed { message } => write!(f, "run journal read failed: {message}"),
        }
    }
}

impl std::error::Error for JournalError {}
