//! Error types
//!
//! Remote failures are deliberately flattened into a single
//! `RemoteError { kind, message }` so that every failed mutation takes the
//! same rollback path in the reconciler.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::EntityId;

/// Classification of a failed remote call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// Network or connectivity failure, including timeouts
    Transport,
    /// The caller does not own the entity
    Authorization,
    /// The referenced entity does not exist (stale id)
    NotFound,
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RemoteErrorKind::Transport => "transport error",
            RemoteErrorKind::Authorization => "not authorized",
            RemoteErrorKind::NotFound => "not found",
        };
        f.write_str(name)
    }
}

/// Failure reported by a `RemoteStore`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Transport, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Authorization, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::NotFound, message)
    }
}

impl From<rusqlite::Error> for RemoteError {
    fn from(error: rusqlite::Error) -> Self {
        match error {
            rusqlite::Error::QueryReturnedNoRows => RemoteError::not_found("no matching row"),
            other => RemoteError::transport(format!("database error: {}", other)),
        }
    }
}

/// Result type for remote store operations
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Input rejected before anything is dispatched
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A name was empty after trimming
    #[error("{field} must not be empty")]
    EmptyName { field: &'static str },

    /// Quantity below 1
    #[error("quantity must be at least 1 (got {0})")]
    InvalidQuantity(u32),

    /// An update carried no fields
    #[error("nothing to update")]
    EmptyPatch,
}

/// Errors surfaced by the reconciler to the view layer
///
/// None of these are fatal to the reconciler itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// Rejected before any optimistic mutation
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Remote call failed; local state was rolled back
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The id is not part of the loaded state
    #[error("unknown list or item: {0}")]
    UnknownEntity(EntityId),

    /// The reconciler was closed while the call was in flight
    #[error("reconciler has been closed")]
    Closed,
}

impl ReconcileError {
    /// Whether the user can reasonably re-trigger the action
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ReconcileError::Remote(RemoteError {
                kind: RemoteErrorKind::Transport,
                ..
            })
        )
    }

    /// Remote failure kind, if this came from the store
    pub fn remote_kind(&self) -> Option<RemoteErrorKind> {
        match self {
            ReconcileError::Remote(e) => Some(e.kind),
            _ => None,
        }
    }
}

/// Result type for reconciler operations
pub type ReconcileResult<T> = Result<T, ReconcileError>;
