//! Pending write operations.
//!
//! A [`PendingOperation`] is created exactly when a domain write could not be
//! confirmed by the remote store (the device was offline or the remote call
//! failed). It stays in the durable log until the remote store accepts it or
//! it fails in too many drains ([`MAX_RETRY_COUNT`] by default), at which
//! point it is dropped and counted as failed.

use crate::{Error, OperationId, Timestamp};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of failed drain attempts after which an operation is dropped.
pub const MAX_RETRY_COUNT: u32 = 5;

/// The kind of remote write an operation replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl OperationType {
    /// Stable lowercase name, used as the persisted representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::UnknownOperationType(other.to_string())),
        }
    }
}

/// Opaque serialized record body.
///
/// The engine never interprets payload bytes; encoding is owned by whoever
/// produced them (JSON for the built-in record types).
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Vec<u8>);

impl Payload {
    /// Wraps raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Serializes a value as JSON.
    pub fn from_json<T: Serialize + ?Sized>(value: &T) -> crate::Result<Self> {
        Ok(Self(serde_json::to_vec(value)?))
    }

    /// Deserializes the payload as JSON.
    pub fn decode<T: DeserializeOwned>(&self) -> crate::Result<T> {
        Ok(serde_json::from_slice(&self.0)?)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(text) => write!(f, "Payload({text})"),
            Err(_) => write!(f, "Payload(<{} bytes>)", self.0.len()),
        }
    }
}

/// A write waiting to be replayed against the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Unique operation ID.
    pub id: OperationId,
    /// What to do remotely.
    #[serde(rename = "type")]
    pub op_type: OperationType,
    /// Remote collection name.
    pub collection: String,
    /// Remote document key. For offline creates this is the local id.
    pub document_id: String,
    /// Record body. `None` for deletes.
    pub payload: Option<Payload>,
    /// When the operation entered the log.
    pub enqueued_at: Timestamp,
    /// Number of drains in which this operation failed.
    pub retry_count: u32,
}

impl PendingOperation {
    /// Creates a fresh operation with a zero retry count.
    pub fn new(
        op_type: OperationType,
        collection: impl Into<String>,
        document_id: impl Into<String>,
        payload: Option<Payload>,
        enqueued_at: Timestamp,
    ) -> Self {
        Self {
            id: OperationId::new(),
            op_type,
            collection: collection.into(),
            document_id: document_id.into(),
            payload,
            enqueued_at,
            retry_count: 0,
        }
    }
}
