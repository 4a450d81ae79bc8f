//! Error types shared by everything above the versioned store.

use core::fmt;

use crate::pipeline::{BlobError, ExecutorError};
use crate::store::StoreError;

use super::state::ParseStateError;

/// Errors caused by the caller: bad input, missing entities, or a request
/// that conflicts with the current lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UserError {
    /// Referenced entity does not exist.
    #[error("{entity} not found: {key}")]
    NotFound {
        /// Entity kind, e.g. `changeset`.
        entity: &'static str,
        /// The key that was looked up.
        key: String,
    },
    /// Request payload failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Request is not allowed in the current state.
    #[error("{0}")]
    ConflictingState(String),
}

impl UserError {
    /// Shorthand for [`UserError::NotFound`].
    pub fn not_found(entity: &'static str, key: impl fmt::Display) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// Shorthand for [`UserError::ConflictingState`].
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::ConflictingState(message.into())
    }

    /// Shorthand for [`UserError::InvalidInput`].
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}

/// Top-level error for managers, pipeline, workers and the merge engine.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Caller error; surfaced to HTTP clients as a 4xx.
    #[error(transparent)]
    User(#[from] UserError),
    /// Versioned store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// Plan or log store failure.
    #[error("blob store error: {0}")]
    Blob(#[from] BlobError),
    /// External executor failure.
    #[error("executor error: {0}")]
    Executor(#[from] ExecutorError),
    /// JSON encoding of a stored column failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Filesystem failure outside the blob stores.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A stored row could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl CoreError {
    /// Returns true for errors caused by the caller.
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(self, Self::User(_))
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(StoreError::Database(err))
    }
}

impl From<ParseStateError> for CoreError {
    fn from(err: ParseStateError) -> Self {
        Self::Corrupt(err.to_string())
    }
}

impl From<chrono::ParseError> for CoreError {
    fn from(err: chrono::ParseError) -> Self {
        Self::Corrupt(format!("timestamp: {err}"))
    }
}

impl From<uuid::Error> for CoreError {
    fn from(err: uuid::Error) -> Self {
        Self::Corrupt(format!("uuid: {err}"))
    }
}
