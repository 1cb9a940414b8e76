//! Error types for the cache layer.

use stockpile_storage::StorageError;
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur in cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Value could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The durable mirror failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A single entry is larger than the whole cache.
    #[error("entry {key} is {size} bytes, cache capacity is {max} bytes")]
    EntryTooLarge { key: String, size: usize, max: usize },

    /// Offline, and neither the cache nor the mirror holds the key.
    #[error("no cached data available offline for {0}")]
    OfflineMiss(String),

    /// The fetch function failed and no mirrored copy exists.
    #[error("fetch failed: {0}")]
    Fetch(#[source] Box<dyn std::error::Error + Send + Sync>),
}
