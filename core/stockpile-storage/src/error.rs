//! Error types for the storage layer.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error (file system).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The write would push the store past its configured byte budget.
    #[error("storage quota exceeded: {used} of {limit} bytes used, {requested} more requested")]
    QuotaExceeded { requested: u64, used: u64, limit: u64 },

    /// Attempted a generic record write into an engine-owned namespace.
    #[error("namespace is reserved: {0}")]
    ReservedNamespace(String),

    /// Invalid data read back from the database.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// The connection lock was poisoned by a panicking writer.
    #[error("storage lock poisoned")]
    Poisoned,

    /// A blocking storage task failed to complete.
    #[error("storage task failed: {0}")]
    Task(String),
}

impl From<stockpile_types::Error> for StorageError {
    fn from(err: stockpile_types::Error) -> Self {
        match err {
            stockpile_types::Error::Serialization(e) => Self::Serialization(e),
            other => Self::InvalidData(other.to_string()),
        }
    }
}
