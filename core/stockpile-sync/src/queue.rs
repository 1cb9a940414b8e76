//! The pending-operation queue and its drain loop.

use crate::error::{RemoteError, SyncError, SyncResult};
use crate::remote::{replay, AuthProvider, KeyReassigner, RemoteStore};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use stockpile_network::{NetworkMonitor, Subscription};
use stockpile_storage::LocalStore;
use stockpile_types::{
    Clock, OperationId, OperationType, Payload, PendingOperation, Timestamp, MAX_RETRY_COUNT,
};
use tracing::{debug, info, warn};

const META_LAST_SYNC: &str = "sync.last_sync";
const META_DROPPED_TOTAL: &str = "sync.dropped_total";

/// Configuration for the sync manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Failed drains after which an operation is dropped.
    pub max_retries: u32,
    /// Per-operation retry policy within one drain.
    pub retry: RetryPolicy,
    /// Drain automatically whenever connectivity returns.
    pub auto_sync: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRY_COUNT,
            retry: RetryPolicy::default(),
            auto_sync: true,
        }
    }
}

/// One error recorded during a drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    /// The operation concerned, if the error is tied to one.
    pub operation_id: Option<OperationId>,
    pub message: String,
}

/// Outcome of one drain pass. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// True iff no operation was dropped and the pass ran to completion.
    pub success: bool,
    pub synced_count: usize,
    pub failed_count: usize,
    pub errors: Vec<SyncFailure>,
}

impl SyncReport {
    fn empty() -> Self {
        Self {
            success: true,
            synced_count: 0,
            failed_count: 0,
            errors: Vec::new(),
        }
    }

    fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            synced_count: 0,
            failed_count: 0,
            errors: vec![SyncFailure {
                operation_id: None,
                message: message.into(),
            }],
        }
    }

    /// Whether the drain never started (already running, offline or
    /// signed out).
    pub fn was_rejected(&self) -> bool {
        !self.success && self.synced_count == 0 && self.failed_count == 0
    }
}

/// Snapshot of queue state for callers surfacing "unsynced" indicators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub pending: usize,
    pub is_syncing: bool,
    pub is_online: bool,
    pub last_sync: Option<Timestamp>,
    /// Operations dropped over the lifetime of the store.
    pub dropped_total: u64,
}

/// Releases the single-flight flag when dropped.
struct DrainGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

enum Outcome {
    /// Carries the new document key when the remote store assigned one.
    Synced(Option<String>),
    Deferred,
    Dropped(String),
}

/// Owns the pending-operation log and replays it against the remote store.
pub struct SyncManager {
    config: SyncConfig,
    store: Arc<LocalStore>,
    remote: Arc<dyn RemoteStore>,
    auth: Arc<dyn AuthProvider>,
    network: NetworkMonitor,
    clock: Arc<dyn Clock>,
    syncing: AtomicBool,
    subscription: Mutex<Option<Subscription>>,
    reassigners: Mutex<HashMap<String, Arc<dyn KeyReassigner>>>,
}

impl SyncManager {
    pub fn new(
        config: SyncConfig,
        store: Arc<LocalStore>,
        remote: Arc<dyn RemoteStore>,
        auth: Arc<dyn AuthProvider>,
        network: NetworkMonitor,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store,
            remote,
            auth,
            network,
            clock,
            syncing: AtomicBool::new(false),
            subscription: Mutex::new(None),
            reassigners: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn subscription(&self) -> MutexGuard<'_, Option<Subscription>> {
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Installs the hook used when the remote store assigns a new key to a
    /// record of `collection`. Replaces any earlier one.
    pub fn register_reassigner(&self, collection: &str, reassigner: Arc<dyn KeyReassigner>) {
        self.reassigners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(collection.to_string(), reassigner);
    }

    fn reassigner(&self, collection: &str) -> Option<Arc<dyn KeyReassigner>> {
        self.reassigners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .cloned()
    }

    // ── Queue ────────────────────────────────────────────────────

    /// Appends a pending operation. Resolves once the operation is durable.
    pub async fn queue_operation(
        &self,
        op_type: OperationType,
        collection: &str,
        document_id: &str,
        payload: Option<Payload>,
    ) -> SyncResult<PendingOperation> {
        let op = PendingOperation::new(
            op_type,
            collection,
            document_id,
            payload,
            self.clock.now(),
        );
        self.enqueue(op.clone()).await?;
        Ok(op)
    }

    /// Appends an already-built operation. Enqueuing the same operation
    /// twice keeps one copy.
    pub async fn enqueue(&self, op: PendingOperation) -> SyncResult<()> {
        let id = op.id;
        let collection = op.collection.clone();
        let op_type = op.op_type;
        self.store.run(move |s| s.enqueue(&op)).await?;
        debug!(operation_id = %id, %op_type, %collection, "Queued operation");
        Ok(())
    }

    pub async fn pending_count(&self) -> SyncResult<usize> {
        Ok(self.store.run(|s| s.pending_count()).await?)
    }

    /// Queued operations in enqueue order.
    pub async fn pending_operations(&self) -> SyncResult<Vec<PendingOperation>> {
        Ok(self.store.run(|s| s.list_pending()).await?)
    }

    /// Whether any queued operation targets `collection/document_id`.
    pub async fn has_pending(&self, collection: &str, document_id: &str) -> SyncResult<bool> {
        Ok(self
            .pending_operations()
            .await?
            .iter()
            .any(|op| op.collection == collection && op.document_id == document_id))
    }

    /// Discards every queued operation. Returns how many were removed.
    pub async fn clear_queue(&self) -> SyncResult<usize> {
        let removed = self.store.run(|s| s.clear_pending()).await?;
        warn!(removed, "Cleared pending-operation queue");
        Ok(removed)
    }

    // ── Drain ────────────────────────────────────────────────────

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    /// Replays the queue against the remote store.
    ///
    /// Works on the snapshot taken at start, in enqueue order. Operations
    /// enqueued mid-drain wait for the next pass. Per-operation failures are
    /// aggregated into the report rather than returned as errors.
    pub async fn drain(&self) -> SyncReport {
        let Some(_guard) = DrainGuard::acquire(&self.syncing) else {
            debug!("Drain requested while another is in flight");
            return SyncReport::rejected("already syncing");
        };
        if !self.network.is_online() {
            return SyncReport::rejected("offline");
        }
        if !self.auth.is_authenticated() {
            return SyncReport::rejected("not authenticated");
        }

        let snapshot = match self.pending_operations().await {
            Ok(ops) => ops,
            Err(e) => return SyncReport::rejected(format!("failed to read queue: {e}")),
        };
        if snapshot.is_empty() {
            return SyncReport::empty();
        }

        info!(pending = snapshot.len(), "Draining pending operations");
        let mut report = SyncReport::empty();
        let mut aborted = false;
        // Documents with an earlier operation still queued in this pass.
        let mut blocked: HashSet<(String, String)> = HashSet::new();
        // Local ids the remote store replaced during this pass.
        let mut renamed: HashMap<(String, String), String> = HashMap::new();

        for mut op in snapshot {
            if let Some(remote_id) = renamed.get(&(op.collection.clone(), op.document_id.clone())) {
                op.document_id = remote_id.clone();
            }
            let key = (op.collection.clone(), op.document_id.clone());
            if blocked.contains(&key) {
                debug!(operation_id = %op.id, "Skipping operation behind a deferred one");
                continue;
            }

            match self.process(&op).await {
                Ok(Outcome::Synced(rekeyed)) => {
                    if let Some(remote_id) = rekeyed {
                        renamed.insert(key, remote_id);
                    }
                    report.synced_count += 1;
                }
                Ok(Outcome::Deferred) => {
                    blocked.insert(key);
                }
                Ok(Outcome::Dropped(message)) => {
                    report.failed_count += 1;
                    report.errors.push(SyncFailure {
                        operation_id: Some(op.id),
                        message,
                    });
                }
                Err(e) => {
                    warn!(operation_id = %op.id, error = %e, "Local update failed, aborting drain");
                    report.errors.push(SyncFailure {
                        operation_id: Some(op.id),
                        message: e.to_string(),
                    });
                    aborted = true;
                    break;
                }
            }
        }

        if let Err(e) = self.record_pass(&report).await {
            warn!(error = %e, "Failed to persist sync bookkeeping");
            report.errors.push(SyncFailure {
                operation_id: None,
                message: e.to_string(),
            });
            aborted = true;
        }

        report.success = report.failed_count == 0 && !aborted;
        info!(
            synced = report.synced_count,
            failed = report.failed_count,
            success = report.success,
            "Drain finished"
        );
        report
    }

    async fn process(&self, op: &PendingOperation) -> SyncResult<Outcome> {
        let result = self
            .config
            .retry
            .run(op.op_type.as_str(), || replay(self.remote.as_ref(), op))
            .await;

        match result {
            Ok(remote_id) => {
                let rekeyed = if remote_id == op.document_id {
                    None
                } else {
                    self.rekey(&op.collection, &op.document_id, &remote_id)
                        .await?;
                    Some(remote_id)
                };
                let id = op.id;
                self.store.run(move |s| s.dequeue(&id)).await?;
                debug!(operation_id = %op.id, "Operation synced");
                Ok(Outcome::Synced(rekeyed))
            }
            Err(err) if err.is_permanent() => {
                let id = op.id;
                self.store.run(move |s| s.dequeue(&id)).await?;
                warn!(operation_id = %op.id, error = %err, "Remote rejected operation, dropped");
                Ok(Outcome::Dropped(drop_message(op, &err)))
            }
            Err(err) => {
                let retry_count = op.retry_count + 1;
                let id = op.id;
                if retry_count >= self.config.max_retries {
                    self.store.run(move |s| s.dequeue(&id)).await?;
                    warn!(
                        operation_id = %op.id,
                        retry_count,
                        error = %err,
                        "Operation exhausted retries, dropped"
                    );
                    Ok(Outcome::Dropped(drop_message(op, &err)))
                } else {
                    self.store
                        .run(move |s| s.set_retry_count(&id, retry_count))
                        .await?;
                    debug!(operation_id = %op.id, retry_count, error = %err, "Operation deferred");
                    Ok(Outcome::Deferred)
                }
            }
        }
    }

    /// Moves a locally created record, and any operations still queued for
    /// it, to the key the backend assigned.
    async fn rekey(&self, collection: &str, local_id: &str, remote_id: &str) -> SyncResult<()> {
        warn!(%collection, %local_id, %remote_id, "Remote store assigned a different id");
        let (collection, local_id, remote_id) = (
            collection.to_string(),
            local_id.to_string(),
            remote_id.to_string(),
        );

        match self.reassigner(&collection) {
            Some(reassigner) => reassigner.reassign(&local_id, &remote_id).await?,
            None => {
                let (collection, local_id, remote_id) =
                    (collection.clone(), local_id.clone(), remote_id.clone());
                self.store
                    .run(move |s| {
                        if let Some(data) = s.get_raw(&collection, &local_id)? {
                            s.put_raw(&collection, &remote_id, &data)?;
                            s.remove(&collection, &local_id)?;
                        }
                        Ok(())
                    })
                    .await?;
            }
        }

        self.store
            .run(move |s| s.retarget_pending(&collection, &local_id, &remote_id))
            .await?;
        Ok(())
    }

    async fn record_pass(&self, report: &SyncReport) -> SyncResult<()> {
        let synced = report.synced_count;
        let dropped = report.failed_count as u64;
        let now = self.clock.now();
        self.store
            .run(move |s| {
                if synced > 0 {
                    s.set_meta(META_LAST_SYNC, &now.as_millis().to_string())?;
                }
                if dropped > 0 {
                    let total = s
                        .get_meta(META_DROPPED_TOTAL)?
                        .and_then(|v| v.parse::<u64>().ok())
                        .unwrap_or(0);
                    s.set_meta(META_DROPPED_TOTAL, &(total + dropped).to_string())?;
                }
                Ok(())
            })
            .await?;
        Ok(())
    }

    // ── Bookkeeping ──────────────────────────────────────────────

    /// When a drain last synced at least one operation.
    pub async fn last_sync_time(&self) -> SyncResult<Option<Timestamp>> {
        let value = self.store.run(|s| s.get_meta(META_LAST_SYNC)).await?;
        Ok(value
            .and_then(|v| v.parse::<u64>().ok())
            .map(Timestamp::from_millis))
    }

    /// Operations dropped over the lifetime of the store.
    pub async fn dropped_total(&self) -> SyncResult<u64> {
        let value = self.store.run(|s| s.get_meta(META_DROPPED_TOTAL)).await?;
        Ok(value.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    pub async fn status(&self) -> SyncResult<SyncStatus> {
        Ok(SyncStatus {
            pending: self.pending_count().await?,
            is_syncing: self.is_syncing(),
            is_online: self.network.is_online(),
            last_sync: self.last_sync_time().await?,
            dropped_total: self.dropped_total().await?,
        })
    }

    // ── Auto-drain ───────────────────────────────────────────────

    /// Drains whenever connectivity returns, and once now if already
    /// online. Must be called from within a tokio runtime. Calling it twice
    /// is a no-op; does nothing when `auto_sync` is off.
    pub fn start(self: &Arc<Self>) -> SyncResult<()> {
        if !self.config.auto_sync {
            return Ok(());
        }
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| SyncError::NoRuntime(e.to_string()))?;

        let mut slot = self.subscription();
        if slot.is_some() {
            return Ok(());
        }

        let weak = Arc::downgrade(self);
        let spawner = handle.clone();
        *slot = Some(self.network.subscribe(move |online| {
            if !online {
                return;
            }
            let Some(manager) = weak.upgrade() else {
                return;
            };
            spawner.spawn(async move {
                let report = manager.drain().await;
                if !report.was_rejected() {
                    debug!(synced = report.synced_count, "Auto-drain after reconnect");
                }
            });
        }));
        drop(slot);
        info!("Auto-sync started");

        if self.network.is_online() {
            let manager = Arc::clone(self);
            handle.spawn(async move {
                manager.drain().await;
            });
        }
        Ok(())
    }

    /// Stops auto-draining. An in-flight drain still completes.
    pub fn stop(&self) {
        if self.subscription().take().is_some() {
            info!("Auto-sync stopped");
        }
    }

    pub fn is_started(&self) -> bool {
        self.subscription().is_some()
    }
}

fn drop_message(op: &PendingOperation, err: &RemoteError) -> String {
    format!(
        "operation {} ({} {}/{}) dropped: {}",
        op.id, op.op_type, op.collection, op.document_id, err
    )
}
