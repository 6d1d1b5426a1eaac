//! Error types for edgetask.
//!
//! All errors are represented by the `EdgeTaskError` enum. The variants follow
//! the propagation table of the task subsystem: structural errors (malformed
//! resource, unknown kind or action) are dropped and logged, transient ones
//! (store conflicts, transport hiccups) are retried by their owners.

use std::{io::ErrorKind, string::FromUtf8Error};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all edgetask operations.
#[derive(Deserialize, Serialize, Error, Debug, Clone, PartialEq)]
pub enum EdgeTaskError {
    /// A resource string that does not follow the node-task grammar.
    #[error("malformed resource '{0}'")]
    MalformedResource(String),

    /// A job kind no handler is registered for.
    #[error("unknown job kind '{0}'")]
    UnknownKind(String),

    /// An action name that is not part of the kind's flow.
    #[error("unknown action '{action}' in {kind} flow")]
    UnknownAction {
        kind: String,
        action: String,
    },

    /// The job spec could not be decoded on the edge.
    #[error("failed to decode job spec: {0}")]
    SpecDeserialize(String),

    /// The message layer refused a downstream message.
    #[error("failed to send message: {0}")]
    Send(String),

    /// The target node has no live session.
    #[error("node {0} is not connected")]
    NodeNotConnected(String),

    /// An edge action failed.
    #[error("{0}")]
    Action(String),

    /// Optimistic update lost against a concurrent writer.
    #[error("conflict updating {kind}/{name}: resource version {expected} is stale")]
    Conflict {
        kind: String,
        name: String,
        expected: u64,
    },

    /// The requested object does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// No executor is registered for the job.
    #[error("executor for {kind}/{name} does not exist")]
    ExecutorNotExists {
        kind: String,
        name: String,
    },

    /// Storage backend errors.
    #[error("{0}")]
    Store(String),

    /// Message layer errors.
    #[error("{0}")]
    Transport(String),

    /// Message queue errors.
    #[error("{0}")]
    Queue(String),

    /// Configuration parsing or validation errors.
    #[error("{0}")]
    Config(String),

    /// Data conversion errors (JSON, extend payloads, etc.).
    #[error("{0}")]
    Convert(String),

    /// The operation was cancelled by shutdown or interrupt.
    #[error("{0} cancelled")]
    Cancelled(String),

    /// I/O operation errors.
    #[error("{0}")]
    IoError(String),

    /// Runtime execution errors.
    #[error("{0}")]
    Runtime(String),
}

impl EdgeTaskError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, EdgeTaskError::Conflict { .. } | EdgeTaskError::Store(_) | EdgeTaskError::Transport(_) | EdgeTaskError::IoError(_))
    }
}

impl From<EdgeTaskError> for String {
    fn from(val: EdgeTaskError) -> Self {
        val.to_string()
    }
}

impl From<std::io::Error> for EdgeTaskError {
    fn from(error: std::io::Error) -> Self {
        EdgeTaskError::IoError(error.to_string())
    }
}

impl From<EdgeTaskError> for std::io::Error {
    fn from(val: EdgeTaskError) -> Self {
        #[allow(clippy::io_other_error)]
        std::io::Error::new(ErrorKind::Other, val.to_string())
    }
}

impl From<FromUtf8Error> for EdgeTaskError {
    fn from(_: FromUtf8Error) -> Self {
        EdgeTaskError::Convert("Error with utf-8 string convert".to_string())
    }
}

impl From<serde_json::Error> for EdgeTaskError {
    fn from(error: serde_json::Error) -> Self {
        EdgeTaskError::Convert(error.to_string())
    }
}

impl From<jsonschema::ValidationError<'_>> for EdgeTaskError {
    fn from(error: jsonschema::ValidationError<'_>) -> Self {
        EdgeTaskError::SpecDeserialize(error.to_string())
    }
}

impl From<sqlx::Error> for EdgeTaskError {
    fn from(error: sqlx::Error) -> Self {
        EdgeTaskError::Store(error.to_string())
    }
}

impl From<toml::de::Error> for EdgeTaskError {
    fn from(error: toml::de::Error) -> Self {
        EdgeTaskError::Config(error.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::EdgeTaskError;

    #[test]
    fn test_reason_messages() {
        assert_eq!(EdgeTaskError::NodeNotConnected("n3".to_string()).to_string(), "node n3 is not connected");
        assert_eq!(
            EdgeTaskError::Send("transport down".to_string()).to_string(),
            "failed to send message: transport down"
        );
    }

    #[test]
    fn test_transient() {
        let conflict = EdgeTaskError::Conflict {
            kind: "imageprepulljob".to_string(),
            name: "j1".to_string(),
            expected: 3,
        };
        assert!(conflict.is_transient());
        assert!(!EdgeTaskError::MalformedResource("a/b".to_string()).is_transient());
    }
}
