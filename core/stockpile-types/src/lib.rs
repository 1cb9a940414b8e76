//! Core type definitions for Stockpile.
//!
//! This crate defines the types shared by every layer of the
//! offline-first engine:
//! - Operation identifiers (UUID v7) and locally generated record ids
//! - Millisecond timestamps and an injectable [`Clock`]
//! - Pending write operations queued while the remote store is unreachable
//! - Names of the persisted local namespaces
//!
//! Domain record shapes (transactions, resources, ...) live in
//! `stockpile-records`, not here.

mod clock;
mod ids;
pub mod namespaces;
mod operation;
mod timestamp;

pub use clock::{Clock, ManualClock, SystemClock};
pub use ids::{LocalId, OperationId};
pub use operation::{OperationType, Payload, PendingOperation, MAX_RETRY_COUNT};
pub use timestamp::Timestamp;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("unknown operation type: {0}")]
    UnknownOperationType(String),
}
