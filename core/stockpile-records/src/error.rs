//! Error types for record services.

use stockpile_cache::CacheError;
use stockpile_storage::StorageError;
use stockpile_sync::{RemoteError, SyncError};
use thiserror::Error;

/// Result type for record operations.
pub type RecordResult<T> = Result<T, RecordError>;

/// Errors that can occur in record operations.
#[derive(Debug, Error)]
pub enum RecordError {
    /// The record failed its own field checks. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// An update or delete named no record id.
    #[error("record has no id")]
    MissingId,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// The remote store rejected the write or read.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<stockpile_types::Error> for RecordError {
    fn from(err: stockpile_types::Error) -> Self {
        match err {
            stockpile_types::Error::Serialization(e) => RecordError::Serialization(e),
            other => RecordError::Validation(other.to_string()),
        }
    }
}
