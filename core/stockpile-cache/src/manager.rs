//! The cache manager.

use crate::entry::{CacheConfig, CacheEntry, CacheOptions, CacheStats, Priority, Served};
use crate::error::{CacheError, CacheResult};
use crate::mirror::Mirror;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use stockpile_network::NetworkMonitor;
use stockpile_storage::{CriticalEntry, StorageError};
use stockpile_types::{Clock, Timestamp};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    total_size: usize,
    next_recency: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheState {
    fn bump(&mut self) -> u64 {
        self.next_recency += 1;
        self.next_recency
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.total_size -= entry.size_bytes;
        Some(entry)
    }

    fn purge_expired(&mut self, now: Timestamp) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        self.evictions += expired.len() as u64;
        expired.len()
    }

    fn least_recently_used(&self) -> Option<String> {
        self.entries
            .iter()
            .min_by_key(|(_, e)| (e.last_accessed_at, e.recency))
            .map(|(k, _)| k.clone())
    }

    /// Makes room for `incoming` bytes: expired entries go first, then the
    /// least recently accessed ones.
    fn ensure_capacity(&mut self, incoming: usize, max: usize, now: Timestamp) {
        if self.total_size + incoming <= max {
            return;
        }
        let purged = self.purge_expired(now);
        if purged > 0 {
            debug!(purged, "Purged expired cache entries");
        }
        while self.total_size + incoming > max {
            let Some(victim) = self.least_recently_used() else {
                break;
            };
            self.remove(&victim);
            self.evictions += 1;
            debug!(key = %victim, "Evicted least recently used cache entry");
        }
    }

    fn insert(&mut self, key: String, entry: CacheEntry, max: usize, now: Timestamp) {
        self.remove(&key);
        self.ensure_capacity(entry.size_bytes, max, now);
        self.total_size += entry.size_bytes;
        self.entries.insert(key, entry);
    }
}

/// TTL + LRU cache with priority tiers and a durable mirror for
/// high/critical entries.
pub struct CacheManager {
    config: CacheConfig,
    state: Mutex<CacheState>,
    mirror: Arc<dyn Mirror>,
    network: NetworkMonitor,
    clock: Arc<dyn Clock>,
}

impl CacheManager {
    pub fn new(
        config: CacheConfig,
        mirror: Arc<dyn Mirror>,
        network: NetworkMonitor,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            state: Mutex::new(CacheState::default()),
            mirror,
            network,
            clock,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn entry_size(key: &str, data: &[u8]) -> usize {
        key.len() + data.len()
    }

    fn new_entry(
        &self,
        state: &mut CacheState,
        key: &str,
        data: Vec<u8>,
        written_at: Timestamp,
        ttl: Duration,
        priority: Priority,
    ) -> CacheEntry {
        let now = self.clock.now();
        CacheEntry {
            size_bytes: Self::entry_size(key, &data),
            data,
            written_at,
            ttl,
            priority,
            access_count: 0,
            last_accessed_at: now,
            recency: state.bump(),
        }
    }

    /// Caches `value` under `key`.
    ///
    /// Evicts expired entries, then least recently accessed ones, until the
    /// new entry fits. High/critical entries are persisted to the mirror
    /// before the call returns.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        options: CacheOptions,
    ) -> CacheResult<()> {
        let data = serde_json::to_vec(value)?;
        let size = Self::entry_size(key, &data);
        if size > self.config.max_cache_size {
            return Err(CacheError::EntryTooLarge {
                key: key.to_string(),
                size,
                max: self.config.max_cache_size,
            });
        }

        let ttl = options
            .ttl
            .unwrap_or(Duration::from_millis(self.config.default_ttl_ms));
        let now = self.clock.now();

        if options.priority.is_mirrored() {
            let mirrored = CriticalEntry {
                data: data.clone(),
                timestamp: now,
                ttl_ms: ttl.as_millis() as u64,
                priority: options.priority.to_string(),
            };
            self.mirror.save(key, mirrored).await?;
        }

        let previous_mirrored = {
            let mut state = self.state();
            let previous = state
                .entries
                .get(key)
                .is_some_and(|e| e.priority.is_mirrored());
            let entry = self.new_entry(&mut state, key, data, now, ttl, options.priority);
            state.insert(key.to_string(), entry, self.config.max_cache_size, now);
            previous
        };

        if previous_mirrored && !options.priority.is_mirrored() {
            self.mirror.remove(key).await?;
        }

        debug!(key, size, priority = %options.priority, "Cached entry");
        Ok(())
    }

    /// Returns the live value for `key`, hydrating from the mirror on a
    /// memory miss. Expired values are reported as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        let now = self.clock.now();
        let resident = {
            let mut state = self.state();
            match state.entries.get(key).map(|e| e.is_expired(now)) {
                Some(false) => {
                    let recency = state.bump();
                    state.hits += 1;
                    state.entries.get_mut(key).map(|entry| {
                        entry.access_count += 1;
                        entry.last_accessed_at = now;
                        entry.recency = recency;
                        entry.data.clone()
                    })
                }
                Some(true) => {
                    state.remove(key);
                    state.evictions += 1;
                    None
                }
                None => None,
            }
        };
        if let Some(data) = resident {
            return Ok(Some(serde_json::from_slice(&data)?));
        }

        match self.hydrate(key, now).await? {
            Some(data) => {
                self.state().hits += 1;
                Ok(Some(serde_json::from_slice(&data)?))
            }
            None => {
                self.state().misses += 1;
                Ok(None)
            }
        }
    }

    /// Re-inserts a live mirrored entry into memory. Returns its bytes.
    async fn hydrate(&self, key: &str, now: Timestamp) -> CacheResult<Option<Vec<u8>>> {
        let Some(mirrored) = self.mirror.load(key).await? else {
            return Ok(None);
        };
        let ttl = Duration::from_millis(mirrored.ttl_ms);
        if now.since(mirrored.timestamp) > ttl {
            return Ok(None);
        }

        let priority: Priority = mirrored.priority.parse().map_err(|e: String| {
            warn!(key, priority = %mirrored.priority, "Corrupt mirrored cache entry");
            StorageError::InvalidData(e)
        })?;
        let data = mirrored.data;
        if Self::entry_size(key, &data) <= self.config.max_cache_size {
            let mut state = self.state();
            let mut entry = self.new_entry(
                &mut state,
                key,
                data.clone(),
                mirrored.timestamp,
                ttl,
                priority,
            );
            entry.access_count = 1;
            state.insert(key.to_string(), entry, self.config.max_cache_size, now);
        }
        debug!(key, "Hydrated cache entry from mirror");
        Ok(Some(data))
    }

    /// Returns the mirrored copy of `key` regardless of age.
    async fn mirrored_copy<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        match self.mirror.load(key).await? {
            Some(mirrored) => Ok(Some(serde_json::from_slice(&mirrored.data)?)),
            None => Ok(None),
        }
    }

    /// Read-through lookup.
    ///
    /// A live hit is returned as [`Served::Cached`]. On a miss while offline
    /// a mirrored copy of any age is served, or the call fails with
    /// [`CacheError::OfflineMiss`]. On a miss while online `fetch` runs and
    /// its result is cached; if it fails, a mirrored copy is served before
    /// the fetch error is propagated.
    pub async fn get_or_fetch<T, F, Fut, E>(
        &self,
        key: &str,
        fetch: F,
        options: CacheOptions,
    ) -> CacheResult<Served<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        if let Some(value) = self.get(key).await? {
            return Ok(Served::Cached(value));
        }

        if !self.network.is_online() {
            return match self.mirrored_copy(key).await? {
                Some(value) => {
                    warn!(key, "Offline, serving stale mirrored data");
                    Ok(Served::Stale(value))
                }
                None => Err(CacheError::OfflineMiss(key.to_string())),
            };
        }

        match fetch().await {
            Ok(value) => {
                self.set(key, &value, options).await?;
                Ok(Served::Fresh(value))
            }
            Err(err) => match self.mirrored_copy(key).await? {
                Some(value) => {
                    warn!(key, error = %err, "Fetch failed, serving stale mirrored data");
                    Ok(Served::Stale(value))
                }
                None => Err(CacheError::Fetch(Box::new(err))),
            },
        }
    }

    /// Drops `key` from memory and from the mirror.
    pub async fn invalidate(&self, key: &str) -> CacheResult<()> {
        self.state().remove(key);
        self.mirror.remove(key).await
    }

    /// Drops every key starting with `prefix` from memory and the mirror.
    /// Returns how many distinct keys were dropped.
    pub async fn invalidate_prefix(&self, prefix: &str) -> CacheResult<usize> {
        let mut dropped: Vec<String> = {
            let mut state = self.state();
            let keys: Vec<String> = state
                .entries
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect();
            for key in &keys {
                state.remove(key);
            }
            keys
        };

        for key in self.mirror.keys().await? {
            if key.starts_with(prefix) {
                self.mirror.remove(&key).await?;
                if !dropped.contains(&key) {
                    dropped.push(key);
                }
            }
        }
        Ok(dropped.len())
    }

    /// Empties memory. Mirrored entries survive and can be hydrated again.
    pub fn clear(&self) {
        let mut state = self.state();
        state.entries.clear();
        state.total_size = 0;
        info!("Cleared in-memory cache");
    }

    /// Empties memory and the mirror.
    pub async fn clear_all(&self) -> CacheResult<()> {
        self.clear();
        self.mirror.clear().await
    }

    /// Removes expired entries from memory. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        self.state().purge_expired(now)
    }

    /// Spawns the periodic expiry sweep. The task ends once the manager is
    /// dropped.
    pub fn spawn_cleanup(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let period = Duration::from_millis(self.config.cleanup_interval_ms.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                let purged = cache.purge_expired();
                if purged > 0 {
                    debug!(purged, "Cache cleanup sweep");
                }
            }
        })
    }

    /// Whether `key` is resident and live, without touching access stats.
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.state()
            .entries
            .get(key)
            .is_some_and(|e| !e.is_expired(now))
    }

    /// Copy of the resident entry for `key`, without touching access stats.
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        self.state().entries.get(key).cloned()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state();
        CacheStats {
            entries: state.entries.len(),
            total_size: state.total_size,
            max_size: self.config.max_cache_size,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
        }
    }
}
