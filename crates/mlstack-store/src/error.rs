//! Store error types.

use thiserror::Error;

/// Errors shared by every store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    /// An entity with the same kind, parent and name already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote store answered with an unexpected status.
    #[error("remote store error ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<mlstack_core::Error> for StoreError {
    fn from(err: mlstack_core::Error) -> Self {
        match err {
            mlstack_core::Error::NotFound(msg) => StoreError::NotFound(msg),
            mlstack_core::Error::Conflict(msg) => StoreError::Conflict(msg),
            mlstack_core::Error::Serialization(e) => StoreError::Serialization(e),
            other => StoreError::Validation(other.to_string()),
        }
    }
}

impl From<StoreError> for mlstack_core::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => mlstack_core::Error::NotFound(msg),
            StoreError::Conflict(msg) => mlstack_core::Error::Conflict(msg),
            StoreError::Validation(msg) => mlstack_core::Error::Validation(msg),
            StoreError::Serialization(e) => mlstack_core::Error::Serialization(e),
            other => mlstack_core::Error::external(other),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
