//! Error types for todo-sync.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },
}

impl Error {
    /// Build a timeout error for the named operation.
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }
}

/// Local persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to open store: {0}")]
    Open(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Transaction aborted: {0}")]
    Transaction(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors from the backend or from the background store context.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("{message} (HTTP {status})")]
    Http { status: u16, message: String },

    #[error("Network request failed: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Offline store reported failure: {0}")]
    Store(String),

    #[error("Offline store worker is not running")]
    WorkerGone,
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::InvalidResponse(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

/// User input errors. These block the action and are never queued.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Todo text must not be empty")]
    EmptyText,

    #[error("Todo {id} not found")]
    NotFound { id: i64 },
}

/// Result type alias for todo-sync.
pub type Result<T> = std::result::Result<T, Error>;
