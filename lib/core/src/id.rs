//! Strongly-typed identifiers for workflow entities.
//!
//! Every identifier wraps a ULID minted at creation time and prints as
//! `{prefix}_{ulid}`, so a workflow id can never be mistaken for a node id in
//! logs, URLs or the interchange document. Parsing accepts the prefixed form
//! or a bare ULID, and rejects an id carrying another entity's prefix.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Error returned when parsing an ID from a string fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseIdError {
    /// The string carries a prefix belonging to another kind of id.
    WrongPrefix {
        id_type: &'static str,
        expected: &'static str,
        found: String,
    },
    /// The ULID part is malformed.
    InvalidUlid { id_type: &'static str, reason: String },
}

impl ParseIdError {
    /// Returns the name of the id type that failed to parse.
    #[must_use]
    pub fn id_type(&self) -> &'static str {
        match self {
            Self::WrongPrefix { id_type, .. } | Self::InvalidUlid { id_type, .. } => id_type,
        }
    }
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongPrefix {
                id_type,
                expected,
                found,
            } => write!(f, "{id_type} must start with '{expected}_', got '{found}_'"),
            Self::InvalidUlid { id_type, reason } => {
                write!(f, "failed to parse {id_type}: {reason}")
            }
        }
    }
}

impl std::error::Error for ParseIdError {}

fn parse_prefixed(
    id_type: &'static str,
    prefix: &'static str,
    s: &str,
) -> Result<Ulid, ParseIdError> {
    let ulid = match s.rsplit_once('_') {
        Some((found, ulid)) if found == prefix => ulid,
        Some((found, _)) => {
            return Err(ParseIdError::WrongPrefix {
                id_type,
                expected: prefix,
                found: found.to_string(),
            });
        }
        None => s,
    };
    Ulid::from_str(ulid).map_err(|e| ParseIdError::InvalidUlid {
        id_type,
        reason: e.to_string(),
    })
}

macro_rules! define_ids {
    ($($(#[$meta:meta])* $name:ident => $prefix:literal;)+) => {$(
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            /// Mints a fresh id.
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "_{}"), self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_prefixed(stringify!($name), $prefix, s).map(Self)
            }
        }
    )+};
}

define_ids! {
    /// A stored workflow definition.
    WorkflowId => "wf";
    /// A node within a workflow graph.
    NodeId => "node";
    /// An edge within a workflow graph.
    EdgeId => "edge";
    /// One execution of a workflow.
    WorkflowRunId => "run";
    /// One entry in a run's log trail.
    LogEntryId => "log";
    /// A job accepted by a scheduler.
    JobId => "job";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_prefix() {
        assert!(WorkflowId::new().to_string().starts_with("wf_"));
        assert!(NodeId::new().to_string().starts_with("node_"));
        assert!(JobId::new().to_string().starts_with("job_"));
    }

    #[test]
    fn parses_prefixed_and_bare_forms() {
        let id = NodeId::new();
        assert_eq!(id.to_string().parse::<NodeId>().unwrap(), id);

        let bare = id.to_string().trim_start_matches("node_").to_string();
        assert_eq!(bare.parse::<NodeId>().unwrap(), id);
    }

    #[test]
    fn foreign_prefix_is_rejected() {
        let err = NodeId::new().to_string().parse::<EdgeId>().unwrap_err();
        assert_eq!(
            err,
            ParseIdError::WrongPrefix {
                id_type: "EdgeId",
                expected: "edge",
                found: "node".to_string(),
            }
        );
        assert!(err.to_string().contains("'edge_'"));
    }

    #[test]
    fn malformed_ulid_is_rejected() {
        let err = "wf_not-a-ulid".parse::<WorkflowId>().unwrap_err();
        assert!(matches!(err, ParseIdError::InvalidUlid { .. }));
        assert_eq!(err.id_type(), "WorkflowId");
    }

    #[test]
    fn later_ids_sort_after_earlier_ones() {
        let first = WorkflowRunId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = WorkflowRunId::new();
        assert!(first < second);
    }

    #[test]
    fn serializes_as_bare_ulid() {
        let id = LogEntryId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert!(!json.contains("log_"));
        assert_eq!(serde_json::from_str::<LogEntryId>(&json).unwrap(), id);
    }
}
