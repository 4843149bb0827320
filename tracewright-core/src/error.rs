use std::path::PathBuf;

use thiserror::Error;

use crate::backend::BackendError;
use crate::chunk::{EditRejection, ExecuteRejection};
use crate::models::ChunkId;

#[derive(Error, Debug)]
pub enum TracewrightError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

/// Editing-session operations that cannot be applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("no turn at index {index}")]
    UnknownTurn { index: usize },

    #[error("no chunk with id {id}")]
    UnknownChunk { id: ChunkId },

    #[error("tool calls can only be added to assistant turns (turn {index} is a user turn)")]
    ToolCallInUserTurn { index: usize },

    #[error(transparent)]
    Edit(#[from] EditRejection),

    #[error("cannot execute: {0}")]
    Execute(#[from] ExecuteRejection),

    #[error("no removal is awaiting confirmation")]
    NoPendingRemoval,

    #[error("conversation is not ready to submit ({} violation(s))", .violations.len())]
    NotSubmittable { violations: Vec<String> },
}

/// Saved-conversation store failures.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error while {operation} at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse saved conversations in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize saved conversations for {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no saved conversation with id '{id}'")]
    UnknownId { id: String },
}

impl StoreError {
    #[must_use]
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn parse(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Parse {
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn serialize(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Serialize {
            path: path.into(),
            source,
        }
    }
}
