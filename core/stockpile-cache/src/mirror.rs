//! Durable backing for mirrored cache entries.

use crate::error::CacheResult;
use async_trait::async_trait;
use std::sync::Arc;
use stockpile_storage::{CriticalEntry, LocalStore};

/// Persistent key/value tier underneath the in-memory cache.
#[async_trait]
pub trait Mirror: Send + Sync {
    async fn load(&self, key: &str) -> CacheResult<Option<CriticalEntry>>;

    async fn save(&self, key: &str, entry: CriticalEntry) -> CacheResult<()>;

    async fn remove(&self, key: &str) -> CacheResult<()>;

    async fn keys(&self) -> CacheResult<Vec<String>>;

    async fn clear(&self) -> CacheResult<()>;
}

/// [`Mirror`] over the `critical_data` namespace of a [`LocalStore`].
#[derive(Clone)]
pub struct StoreMirror {
    store: Arc<LocalStore>,
}

impl StoreMirror {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Mirror for StoreMirror {
    async fn load(&self, key: &str) -> CacheResult<Option<CriticalEntry>> {
        let key = key.to_string();
        Ok(self.store.run(move |s| s.get_critical(&key)).await?)
    }

    async fn save(&self, key: &str, entry: CriticalEntry) -> CacheResult<()> {
        let key = key.to_string();
        Ok(self.store.run(move |s| s.put_critical(&key, &entry)).await?)
    }

    async fn remove(&self, key: &str) -> CacheResult<()> {
        let key = key.to_string();
        self.store.run(move |s| s.remove_critical(&key)).await?;
        Ok(())
    }

    async fn keys(&self) -> CacheResult<Vec<String>> {
        Ok(self.store.run(|s| s.critical_keys()).await?)
    }

    async fn clear(&self) -> CacheResult<()> {
        self.store.run(|s| s.clear_critical()).await?;
        Ok(())
    }
}
