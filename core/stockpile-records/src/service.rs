//! Local-first read/write service for one record collection.
//!
//! Every write lands in the durable store before the remote store is
//! contacted, so a write is never lost to connectivity. When the remote
//! store confirms it the result is [`WriteState::Confirmed`]; otherwise a
//! pending operation is queued and the result is [`WriteState::Pending`].
//!
//! Reads consult the ephemeral cache, then the durable store, then (only
//! when online and signed in) the remote store.

use crate::error::{RecordError, RecordResult};
use crate::record::{Record, WriteState, Written};
use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;
use stockpile_cache::{CacheError, CacheManager, CacheOptions};
use stockpile_network::NetworkMonitor;
use stockpile_storage::LocalStore;
use stockpile_sync::{
    AuthProvider, KeyReassigner, RemoteChange, RemoteError, RemoteStore, RetryPolicy, SyncError,
    SyncManager, SyncResult,
};
use stockpile_types::{Clock, LocalId, OperationType, Payload};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The shared collaborators every record service works against.
#[derive(Clone)]
pub struct ServiceContext {
    pub store: Arc<LocalStore>,
    pub cache: Arc<CacheManager>,
    pub sync: Arc<SyncManager>,
    pub remote: Arc<dyn RemoteStore>,
    pub auth: Arc<dyn AuthProvider>,
    pub network: NetworkMonitor,
    pub clock: Arc<dyn Clock>,
    /// Retry policy for direct remote writes and reads.
    pub retry: RetryPolicy,
    /// Options for cached records.
    pub cache_options: CacheOptions,
}

/// Local-first CRUD for records of type `R`.
pub struct RecordService<R: Record> {
    ctx: ServiceContext,
    _record: PhantomData<fn() -> R>,
}

/// Moves a record of type `R` to a server-assigned key during a drain,
/// rewriting its embedded id and dropping cached copies under either key.
struct RecordKeys<R: Record> {
    store: Arc<LocalStore>,
    cache: Arc<CacheManager>,
    _record: PhantomData<fn() -> R>,
}

#[async_trait]
impl<R: Record> KeyReassigner for RecordKeys<R> {
    async fn reassign(&self, local_id: &str, remote_id: &str) -> SyncResult<()> {
        let (from, to) = (local_id.to_string(), remote_id.to_string());
        self.store
            .run(move |s| {
                if let Some(mut record) = s.get_by_id::<R>(R::COLLECTION, &from)? {
                    record.set_id(to.clone());
                    s.put(R::COLLECTION, &to, &record)?;
                    s.remove(R::COLLECTION, &from)?;
                }
                Ok(())
            })
            .await?;

        for id in [local_id, remote_id] {
            self.cache
                .invalidate(&RecordService::<R>::cache_key(id))
                .await
                .map_err(|e| SyncError::Reassign(e.to_string()))?;
        }
        debug!(collection = R::COLLECTION, %local_id, %remote_id, "Record moved to assigned id");
        Ok(())
    }
}

impl<R: Record> RecordService<R> {
    /// Builds the service and registers its key reassigner with the sync
    /// manager.
    pub fn new(ctx: ServiceContext) -> Self {
        ctx.sync.register_reassigner(
            R::COLLECTION,
            Arc::new(RecordKeys::<R> {
                store: ctx.store.clone(),
                cache: ctx.cache.clone(),
                _record: PhantomData,
            }),
        );
        Self {
            ctx,
            _record: PhantomData,
        }
    }

    fn cache_key(id: &str) -> String {
        format!("{}:{}", R::COLLECTION, id)
    }

    fn remote_reachable(&self) -> bool {
        self.ctx.network.is_online() && self.ctx.auth.is_authenticated()
    }

    /// A write may go straight to the remote store only when it is
    /// reachable and no earlier write to the same document is still queued.
    async fn can_write_through(&self, id: &str) -> RecordResult<bool> {
        if !self.remote_reachable() {
            return Ok(false);
        }
        Ok(!self.ctx.sync.has_pending(R::COLLECTION, id).await?)
    }

    // ── Local plumbing ───────────────────────────────────────────

    async fn load_local(&self, id: &str) -> RecordResult<Option<Vec<u8>>> {
        let id = id.to_string();
        Ok(self
            .ctx
            .store
            .run(move |s| s.get_raw(R::COLLECTION, &id))
            .await?)
    }

    async fn save_local(&self, id: &str, data: Vec<u8>) -> RecordResult<()> {
        let id = id.to_string();
        self.ctx
            .store
            .run(move |s| s.put_raw(R::COLLECTION, &id, &data))
            .await?;
        Ok(())
    }

    async fn remove_local(&self, id: &str) -> RecordResult<()> {
        let id = id.to_string();
        self.ctx
            .store
            .run(move |s| s.remove(R::COLLECTION, &id))
            .await?;
        Ok(())
    }

    /// Puts the durable store back to `previous` after a rejected write.
    async fn restore_local(&self, id: &str, previous: Option<Vec<u8>>) -> RecordResult<()> {
        match previous {
            Some(data) => self.save_local(id, data).await?,
            None => self.remove_local(id).await?,
        }
        self.ctx.cache.invalidate(&Self::cache_key(id)).await?;
        Ok(())
    }

    async fn cache_record(&self, id: &str, record: &R) -> RecordResult<()> {
        match self
            .ctx
            .cache
            .set(&Self::cache_key(id), record, self.ctx.cache_options)
            .await
        {
            Ok(()) => Ok(()),
            Err(CacheError::EntryTooLarge { size, .. }) => {
                debug!(collection = R::COLLECTION, %id, size, "Record too large to cache");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    // ── Writes ───────────────────────────────────────────────────

    /// Creates a record.
    ///
    /// Records without an id get a local one (`<prefix>_<ms>_<rand>`),
    /// which is also the document key requested from the remote store.
    pub async fn create(&self, mut record: R) -> RecordResult<Written<R>> {
        record.validate().map_err(RecordError::Validation)?;

        let id = match record.id() {
            Some(id) => id.to_string(),
            None => {
                let id = LocalId::generate(R::ID_PREFIX, self.ctx.clock.now());
                record.set_id(id.clone());
                id
            }
        };
        let payload = Payload::from_json(&record)?;
        let previous = self.load_local(&id).await?;
        self.save_local(&id, payload.as_bytes().to_vec()).await?;

        if self.can_write_through(&id).await? {
            let result = self
                .ctx
                .retry
                .run("create", || {
                    self.ctx.remote.create(R::COLLECTION, Some(&id), &payload)
                })
                .await;
            match result {
                Ok(remote_id) => {
                    let id = if remote_id == id {
                        id
                    } else {
                        self.adopt_remote_id(&mut record, &id, remote_id).await?
                    };
                    self.cache_record(&id, &record).await?;
                    info!(collection = R::COLLECTION, %id, "Record created");
                    return Ok(Written {
                        record,
                        state: WriteState::Confirmed,
                    });
                }
                Err(err) if err.is_permanent() => {
                    self.restore_local(&id, previous).await?;
                    return Err(err.into());
                }
                Err(err) => {
                    warn!(collection = R::COLLECTION, %id, error = %err, "Remote create failed, queueing");
                }
            }
        }

        if let Err(e) = self
            .ctx
            .sync
            .queue_operation(OperationType::Create, R::COLLECTION, &id, Some(payload))
            .await
        {
            self.restore_local(&id, previous).await?;
            return Err(e.into());
        }
        self.cache_record(&id, &record).await?;
        info!(collection = R::COLLECTION, %id, "Record created locally, sync pending");
        Ok(Written {
            record,
            state: WriteState::Pending,
        })
    }

    /// Moves a just-created record to the key the remote store chose.
    async fn adopt_remote_id(
        &self,
        record: &mut R,
        local_id: &str,
        remote_id: String,
    ) -> RecordResult<String> {
        warn!(collection = R::COLLECTION, %local_id, %remote_id, "Remote store assigned a different id");
        record.set_id(remote_id.clone());
        self.save_local(&remote_id, serde_json::to_vec(record)?).await?;
        self.remove_local(local_id).await?;
        self.ctx.cache.invalidate(&Self::cache_key(local_id)).await?;
        Ok(remote_id)
    }

    /// Replaces an existing record. The record must carry its id.
    pub async fn update(&self, record: R) -> RecordResult<Written<R>> {
        record.validate().map_err(RecordError::Validation)?;
        let id = record.id().map(str::to_string).ok_or(RecordError::MissingId)?;

        let payload = Payload::from_json(&record)?;
        let previous = self.load_local(&id).await?;
        self.save_local(&id, payload.as_bytes().to_vec()).await?;

        if self.can_write_through(&id).await? {
            let result = self
                .ctx
                .retry
                .run("update", || self.ctx.remote.update(R::COLLECTION, &id, &payload))
                .await;
            match result {
                Ok(()) => {
                    self.cache_record(&id, &record).await?;
                    debug!(collection = R::COLLECTION, %id, "Record updated");
                    return Ok(Written {
                        record,
                        state: WriteState::Confirmed,
                    });
                }
                Err(err) if err.is_permanent() => {
                    self.restore_local(&id, previous).await?;
                    return Err(err.into());
                }
                Err(err) => {
                    warn!(collection = R::COLLECTION, %id, error = %err, "Remote update failed, queueing");
                }
            }
        }

        if let Err(e) = self
            .ctx
            .sync
            .queue_operation(OperationType::Update, R::COLLECTION, &id, Some(payload))
            .await
        {
            self.restore_local(&id, previous).await?;
            return Err(e.into());
        }
        self.cache_record(&id, &record).await?;
        Ok(Written {
            record,
            state: WriteState::Pending,
        })
    }

    /// Deletes a record locally and remotely.
    pub async fn delete(&self, id: &str) -> RecordResult<WriteState> {
        let previous = self.load_local(id).await?;
        self.remove_local(id).await?;
        self.ctx.cache.invalidate(&Self::cache_key(id)).await?;

        if self.can_write_through(id).await? {
            let result = self
                .ctx
                .retry
                .run("delete", || self.ctx.remote.delete(R::COLLECTION, id))
                .await;
            match result {
                Ok(()) | Err(RemoteError::NotFound(_)) => {
                    debug!(collection = R::COLLECTION, %id, "Record deleted");
                    return Ok(WriteState::Confirmed);
                }
                Err(err) if err.is_permanent() => {
                    self.restore_local(id, previous).await?;
                    return Err(err.into());
                }
                Err(err) => {
                    warn!(collection = R::COLLECTION, %id, error = %err, "Remote delete failed, queueing");
                }
            }
        }

        if let Err(e) = self
            .ctx
            .sync
            .queue_operation(OperationType::Delete, R::COLLECTION, id, None)
            .await
        {
            self.restore_local(id, previous).await?;
            return Err(e.into());
        }
        Ok(WriteState::Pending)
    }

    // ── Reads ────────────────────────────────────────────────────

    /// Looks a record up in the cache, the durable store, then the remote
    /// store. Offline, a local miss is `Ok(None)`.
    pub async fn get(&self, id: &str) -> RecordResult<Option<R>> {
        if let Some(record) = self.ctx.cache.get::<R>(&Self::cache_key(id)).await? {
            return Ok(Some(record));
        }

        if let Some(data) = self.load_local(id).await? {
            let record: R = serde_json::from_slice(&data)?;
            self.cache_record(id, &record).await?;
            return Ok(Some(record));
        }

        if !self.remote_reachable() {
            debug!(collection = R::COLLECTION, %id, "Local miss while offline");
            return Ok(None);
        }

        let fetched = self
            .ctx
            .retry
            .run("get", || self.ctx.remote.get(R::COLLECTION, id))
            .await?;
        let Some(payload) = fetched else {
            return Ok(None);
        };
        let record = self.store_remote(id, &payload).await?;
        Ok(Some(record))
    }

    /// Every locally known record, ordered by id.
    pub async fn list(&self) -> RecordResult<Vec<R>> {
        Ok(self
            .ctx
            .store
            .run(|s| s.get_all::<R>(R::COLLECTION))
            .await?)
    }

    /// Queued operations for this collection.
    pub async fn pending_count(&self) -> RecordResult<usize> {
        Ok(self
            .ctx
            .sync
            .pending_operations()
            .await?
            .iter()
            .filter(|op| op.collection == R::COLLECTION)
            .count())
    }

    // ── Remote changes ───────────────────────────────────────────

    /// Decodes a remote document and writes it to the store and cache.
    async fn store_remote(&self, id: &str, payload: &Payload) -> RecordResult<R> {
        let mut record: R = payload.decode()?;
        if record.id().is_none() {
            record.set_id(id.to_string());
        }
        self.save_local(id, serde_json::to_vec(&record)?).await?;
        self.cache_record(id, &record).await?;
        Ok(record)
    }

    /// Applies one pushed change. Documents with queued local writes are
    /// left alone until those writes drain. Returns whether the change was
    /// applied.
    pub async fn apply_remote(&self, change: RemoteChange) -> RecordResult<bool> {
        if self.ctx.sync.has_pending(R::COLLECTION, change.id()).await? {
            debug!(collection = R::COLLECTION, id = change.id(), "Local write pending, remote change skipped");
            return Ok(false);
        }
        match change {
            RemoteChange::Upserted { id, payload } => {
                self.store_remote(&id, &payload).await?;
            }
            RemoteChange::Removed { id } => {
                self.remove_local(&id).await?;
                self.ctx.cache.invalidate(&Self::cache_key(&id)).await?;
            }
        }
        Ok(true)
    }

    /// Subscribes to the remote change stream for this collection and
    /// applies every change locally. The task ends when the stream closes
    /// or the service is dropped.
    pub async fn watch(self: &Arc<Self>) -> RecordResult<JoinHandle<()>> {
        let mut changes = self.ctx.remote.subscribe(R::COLLECTION).await?;
        let weak = Arc::downgrade(self);
        info!(collection = R::COLLECTION, "Watching remote changes");
        Ok(tokio::spawn(async move {
            while let Some(change) = changes.recv().await {
                let Some(service) = weak.upgrade() else {
                    break;
                };
                let id = change.id().to_string();
                if let Err(e) = service.apply_remote(change).await {
                    warn!(collection = R::COLLECTION, %id, error = %e, "Failed to apply remote change");
                }
            }
            debug!(collection = R::COLLECTION, "Remote change stream closed");
        }))
    }
}
