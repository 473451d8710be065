//! Error types for the sync layer.

use thiserror::Error;
use tyl_storage::StorageError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote service failed (network error, 5xx, refused write).
    #[error("remote error: {0}")]
    Remote(String),

    /// A remote call exceeded the request timeout.
    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    /// The remote returned rows that cannot be applied.
    #[error("malformed remote payload: {0}")]
    MalformedPayload(String),

    /// Local store error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The row a mutation targets does not exist locally.
    #[error("not found: {0}")]
    NotFound(String),

    /// A blocking store task panicked or was cancelled.
    #[error("store task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}
