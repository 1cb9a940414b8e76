//! Remote store abstraction.
//!
//! The engine treats the authoritative backend as an opaque collaborator. It
//! only needs document-level create/update/delete/get plus a per-collection
//! push stream, so any backend can sit behind [`RemoteStore`].

use crate::error::{RemoteResult, SyncResult};
use async_trait::async_trait;
use stockpile_types::{OperationType, Payload, PendingOperation};
use tokio::sync::mpsc;

/// A change pushed by the remote store for a subscribed collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteChange {
    /// A document was created or replaced.
    Upserted { id: String, payload: Payload },
    /// A document was deleted.
    Removed { id: String },
}

impl RemoteChange {
    /// The affected document id.
    pub fn id(&self) -> &str {
        match self {
            RemoteChange::Upserted { id, .. } | RemoteChange::Removed { id } => id,
        }
    }
}

/// The authoritative backend.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Creates a document. When `id` is given the backend should use it as
    /// the document key. Returns the key actually used.
    async fn create(
        &self,
        collection: &str,
        id: Option<&str>,
        payload: &Payload,
    ) -> RemoteResult<String>;

    /// Replaces an existing document.
    async fn update(&self, collection: &str, id: &str, payload: &Payload) -> RemoteResult<()>;

    /// Deletes a document.
    async fn delete(&self, collection: &str, id: &str) -> RemoteResult<()>;

    /// Fetches a document, `None` if it does not exist.
    async fn get(&self, collection: &str, id: &str) -> RemoteResult<Option<Payload>>;

    /// Opens a change stream for `collection`. The stream ends when the
    /// backend drops its sender.
    async fn subscribe(&self, collection: &str) -> RemoteResult<mpsc::Receiver<RemoteChange>>;
}

/// Session state of the current user.
pub trait AuthProvider: Send + Sync {
    fn is_authenticated(&self) -> bool;
}

/// Moves a locally created record to the key the remote store assigned.
///
/// Registered per collection on the [`crate::SyncManager`] by the layer
/// that knows the record shape, so the stored body and any cached copies
/// follow the new key. Collections without one get a byte-for-byte move.
#[async_trait]
pub trait KeyReassigner: Send + Sync {
    async fn reassign(&self, local_id: &str, remote_id: &str) -> SyncResult<()>;
}

/// Replays a queued operation against `remote`.
///
/// Returns the remote document key: the id assigned by the backend for a
/// create, the operation's own document id otherwise. A delete of a
/// document the backend no longer has counts as success.
pub async fn replay(remote: &dyn RemoteStore, op: &PendingOperation) -> RemoteResult<String> {
    match op.op_type {
        OperationType::Create => {
            let payload = required_payload(op)?;
            remote
                .create(&op.collection, Some(&op.document_id), payload)
                .await
        }
        OperationType::Update => {
            let payload = required_payload(op)?;
            remote
                .update(&op.collection, &op.document_id, payload)
                .await?;
            Ok(op.document_id.clone())
        }
        OperationType::Delete => match remote.delete(&op.collection, &op.document_id).await {
            Ok(()) | Err(crate::RemoteError::NotFound(_)) => Ok(op.document_id.clone()),
            Err(e) => Err(e),
        },
    }
}

fn required_payload(op: &PendingOperation) -> RemoteResult<&Payload> {
    op.payload.as_ref().ok_or_else(|| {
        crate::RemoteError::Validation(format!("{} operation {} has no payload", op.op_type, op.id))
    })
}
