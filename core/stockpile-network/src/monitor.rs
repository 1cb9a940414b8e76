//! Online/offline state with transition callbacks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::watch;
use tracing::{debug, info};

type Listener = Arc<dyn Fn(bool) + Send + Sync>;

struct Inner {
    state: watch::Sender<bool>,
    listeners: Mutex<HashMap<u64, Listener>>,
    next_id: AtomicU64,
}

/// Observes connectivity. Clones share the same state and subscribers.
#[derive(Clone)]
pub struct NetworkMonitor {
    inner: Arc<Inner>,
}

impl NetworkMonitor {
    /// Creates a monitor with the given initial state.
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(online);
        Self {
            inner: Arc::new(Inner {
                state,
                listeners: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Current connectivity snapshot.
    pub fn is_online(&self) -> bool {
        *self.inner.state.borrow()
    }

    /// Records a connectivity reading. Subscribers are called only when the
    /// reading differs from the previous one.
    pub fn set_online(&self, online: bool) {
        let changed = self.inner.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if !changed {
            return;
        }

        info!(online, "Connectivity changed");
        let listeners: Vec<Listener> = match self.inner.listeners.lock() {
            Ok(guard) => guard.values().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().values().cloned().collect(),
        };
        for listener in listeners {
            listener(online);
        }
    }

    /// Registers `callback` for every future transition. The callback stays
    /// registered until the returned [`Subscription`] is dropped or
    /// explicitly unsubscribed.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        match self.inner.listeners.lock() {
            Ok(mut guard) => guard.insert(id, Arc::new(callback)),
            Err(poisoned) => poisoned.into_inner().insert(id, Arc::new(callback)),
        };
        debug!(subscription = id, "Connectivity subscriber added");
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// A watch receiver over the connectivity state, for async consumers.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.inner.state.subscribe()
    }

    /// Resolves once the monitor reports online.
    pub async fn wait_until_online(&self) {
        let mut rx = self.watch();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|online| *online).await;
    }

    /// Number of registered callbacks.
    pub fn subscriber_count(&self) -> usize {
        match self.inner.listeners.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl std::fmt::Debug for NetworkMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkMonitor")
            .field("online", &self.is_online())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Handle for a registered connectivity callback. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    inner: Weak<Inner>,
}

impl Subscription {
    /// Removes the callback.
    pub fn unsubscribe(self) {
        // Drop does the work.
    }

    fn remove(&self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let removed = match inner.listeners.lock() {
            Ok(mut guard) => guard.remove(&self.id),
            Err(poisoned) => poisoned.into_inner().remove(&self.id),
        };
        if removed.is_some() {
            debug!(subscription = self.id, "Connectivity subscriber removed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}
