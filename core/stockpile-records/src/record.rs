//! The record abstraction shared by every domain collection.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A domain record owned by a [`crate::RecordService`].
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Remote collection and local namespace.
    const COLLECTION: &'static str;

    /// Prefix of locally generated ids, e.g. `txn` for `txn_<ms>_<rand>`.
    const ID_PREFIX: &'static str;

    /// The record id, `None` before the first write.
    fn id(&self) -> Option<&str>;

    fn set_id(&mut self, id: String);

    /// Checks required fields. The message is surfaced to the caller as
    /// [`crate::RecordError::Validation`].
    fn validate(&self) -> Result<(), String>;
}

/// Whether the remote store has confirmed a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    /// The remote store accepted the write.
    Confirmed,
    /// The write is committed locally and queued for sync.
    Pending,
}

/// Result of a successful create or update.
#[derive(Debug, Clone, PartialEq)]
pub struct Written<R> {
    pub record: R,
    pub state: WriteState,
}

impl<R> Written<R> {
    pub fn is_pending(&self) -> bool {
        self.state == WriteState::Pending
    }
}
