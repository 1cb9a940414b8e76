//! Error types for the sync layer.

use stockpile_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for remote-store calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Local persistence failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The remote store rejected or could not serve a call.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A [`crate::KeyReassigner`] could not finish moving a record.
    #[error("key reassignment failed: {0}")]
    Reassign(String),

    /// Auto-drain needs a tokio runtime to spawn onto.
    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),
}

/// Failures reported by a [`crate::RemoteStore`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(String),

    #[error("remote call timed out")]
    Timeout,

    #[error("remote store unavailable: {0}")]
    Unavailable(String),

    /// The payload was rejected as invalid.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not authenticated")]
    Unauthenticated,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl RemoteError {
    /// Returns true for failures worth retrying: the call may succeed if
    /// repeated unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteError::Network(_) | RemoteError::Timeout | RemoteError::Unavailable(_)
        )
    }

    /// Returns true for rejections that repeating can never fix.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            RemoteError::Validation(_) | RemoteError::PermissionDenied(_)
        )
    }
}
