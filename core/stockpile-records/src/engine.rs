//! Engine wiring: builds every service from one configuration.

use crate::error::{RecordError, RecordResult};
use crate::record::Record;
use crate::service::{RecordService, ServiceContext};
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use stockpile_cache::{CacheConfig, CacheManager, CacheOptions, StoreMirror};
use stockpile_network::NetworkMonitor;
use stockpile_storage::{LocalStore, StoreConfig};
use stockpile_sync::{AuthProvider, RemoteStore, SyncConfig, SyncManager, SyncReport, SyncStatus};
use stockpile_types::{Clock, SystemClock};
use tokio::task::JoinHandle;
use tracing::info;

/// Configuration for the whole engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StockpileConfig {
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub sync: SyncConfig,
}

impl StockpileConfig {
    /// Parses a JSON configuration. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> RecordResult<Self> {
        serde_json::from_str(json).map_err(|e| RecordError::Config(e.to_string()))
    }

    /// Reads a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> RecordResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json_str(&contents)?;
        info!(path = %path.as_ref().display(), "Loaded configuration");
        Ok(config)
    }
}

/// The offline-first engine: one durable store, one cache, one sync queue,
/// shared by every record service it hands out.
pub struct Stockpile {
    ctx: ServiceContext,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

impl Stockpile {
    /// Opens the engine with the system clock.
    pub fn open(
        config: &StockpileConfig,
        remote: Arc<dyn RemoteStore>,
        auth: Arc<dyn AuthProvider>,
        network: NetworkMonitor,
    ) -> RecordResult<Self> {
        Self::open_with_clock(config, remote, auth, network, Arc::new(SystemClock))
    }

    pub fn open_with_clock(
        config: &StockpileConfig,
        remote: Arc<dyn RemoteStore>,
        auth: Arc<dyn AuthProvider>,
        network: NetworkMonitor,
        clock: Arc<dyn Clock>,
    ) -> RecordResult<Self> {
        let store = Arc::new(LocalStore::open(&config.store)?);
        let cache = Arc::new(CacheManager::new(
            config.cache.clone(),
            Arc::new(StoreMirror::new(store.clone())),
            network.clone(),
            clock.clone(),
        ));
        let sync = Arc::new(SyncManager::new(
            config.sync.clone(),
            store.clone(),
            remote.clone(),
            auth.clone(),
            network.clone(),
            clock.clone(),
        ));
        info!(
            persistent = config.store.path.is_some(),
            online = network.is_online(),
            "Stockpile opened"
        );

        Ok(Self {
            ctx: ServiceContext {
                store,
                cache,
                sync,
                remote,
                auth,
                network,
                clock,
                retry: config.sync.retry.clone(),
                cache_options: CacheOptions::default(),
            },
            cleanup: Mutex::new(None),
        })
    }

    fn cleanup(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.cleanup.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts auto-drain on reconnect and the periodic cache sweep. Must be
    /// called from within a tokio runtime.
    pub fn start(&self) -> RecordResult<()> {
        self.ctx.sync.start()?;
        let mut cleanup = self.cleanup();
        if cleanup.is_none() {
            *cleanup = Some(self.ctx.cache.spawn_cleanup());
        }
        Ok(())
    }

    /// Stops background work. Queued operations stay durable.
    pub fn shutdown(&self) {
        self.ctx.sync.stop();
        if let Some(handle) = self.cleanup().take() {
            handle.abort();
        }
    }

    /// A service for records of type `R`.
    pub fn records<R: Record>(&self) -> Arc<RecordService<R>> {
        Arc::new(RecordService::new(self.ctx.clone()))
    }

    pub fn transactions(&self) -> Arc<RecordService<Transaction>> {
        self.records()
    }

    /// Drains the queue now.
    pub async fn sync_now(&self) -> SyncReport {
        self.ctx.sync.drain().await
    }

    pub async fn status(&self) -> RecordResult<SyncStatus> {
        Ok(self.ctx.sync.status().await?)
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.ctx.store
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.ctx.cache
    }

    pub fn sync(&self) -> &Arc<SyncManager> {
        &self.ctx.sync
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.ctx.network
    }
}

impl Drop for Stockpile {
    fn drop(&mut self) {
        self.shutdown();
    }
}
