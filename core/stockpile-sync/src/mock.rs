//! In-memory remote store and auth provider for testing.

use crate::error::{RemoteError, RemoteResult};
use crate::remote::{AuthProvider, RemoteChange, RemoteStore};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use stockpile_types::Payload;
use tokio::sync::mpsc;

/// A call received by [`MockRemoteStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Create {
        collection: String,
        id: Option<String>,
        payload: Payload,
    },
    Update {
        collection: String,
        id: String,
        payload: Payload,
    },
    Delete {
        collection: String,
        id: String,
    },
    Get {
        collection: String,
        id: String,
    },
    Subscribe {
        collection: String,
    },
}

#[derive(Default)]
struct MockState {
    documents: HashMap<String, BTreeMap<String, Payload>>,
    calls: Vec<RemoteCall>,
    scripted: VecDeque<RemoteError>,
    always: Option<RemoteError>,
    assign_ids: bool,
    next_id: u64,
    latency: Option<Duration>,
    subscribers: HashMap<String, Vec<mpsc::Sender<RemoteChange>>>,
}

/// A scriptable in-memory [`RemoteStore`].
///
/// Every call is logged, then checked against the failure script: queued
/// one-shot failures first, then the standing failure if one is set.
#[derive(Default)]
pub struct MockRemoteStore {
    state: Mutex<MockState>,
}

impl MockRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fails the next call with `err`.
    pub fn fail_next(&self, err: RemoteError) {
        self.state().scripted.push_back(err);
    }

    /// Fails the next `n` calls with `err`.
    pub fn fail_next_n(&self, n: usize, err: RemoteError) {
        let mut state = self.state();
        for _ in 0..n {
            state.scripted.push_back(err.clone());
        }
    }

    /// Fails every call with `err` until [`Self::recover`].
    pub fn fail_always(&self, err: RemoteError) {
        self.state().always = Some(err);
    }

    /// Clears all scripted and standing failures.
    pub fn recover(&self) {
        let mut state = self.state();
        state.scripted.clear();
        state.always = None;
    }

    /// Ignores client-supplied ids on create and assigns `remote_<n>` keys.
    pub fn assign_server_ids(&self, enabled: bool) {
        self.state().assign_ids = enabled;
    }

    /// Delays every call by `latency` (tokio time).
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = Some(latency);
    }

    /// Seeds a document without logging a call.
    pub fn insert_document(&self, collection: &str, id: &str, payload: Payload) {
        self.state()
            .documents
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), payload);
    }

    /// Current content of a document.
    pub fn document(&self, collection: &str, id: &str) -> Option<Payload> {
        self.state()
            .documents
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    /// Ids of every document in `collection`, sorted.
    pub fn document_ids(&self, collection: &str) -> Vec<String> {
        self.state()
            .documents
            .get(collection)
            .map(|docs| docs.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }

    /// Pushes `change` to every open stream for `collection`. Returns how
    /// many streams received it.
    pub async fn push_change(&self, collection: &str, change: RemoteChange) -> usize {
        let senders: Vec<mpsc::Sender<RemoteChange>> = {
            let mut state = self.state();
            let Some(senders) = state.subscribers.get_mut(collection) else {
                return 0;
            };
            senders.retain(|tx| !tx.is_closed());
            senders.clone()
        };
        let mut delivered = 0;
        for tx in senders {
            if tx.send(change.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Closes every open stream.
    pub fn close_streams(&self) {
        self.state().subscribers.clear();
    }

    /// Logs the call and applies the failure script.
    async fn begin(&self, call: RemoteCall) -> RemoteResult<()> {
        let latency = {
            let mut state = self.state();
            state.calls.push(call);
            if let Some(err) = state.scripted.pop_front() {
                return Err(err);
            }
            if let Some(err) = state.always.clone() {
                return Err(err);
            }
            state.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MockRemoteStore {
    async fn create(
        &self,
        collection: &str,
        id: Option<&str>,
        payload: &Payload,
    ) -> RemoteResult<String> {
        self.begin(RemoteCall::Create {
            collection: collection.to_string(),
            id: id.map(str::to_string),
            payload: payload.clone(),
        })
        .await?;

        let mut state = self.state();
        let key = match id {
            Some(id) if !state.assign_ids => id.to_string(),
            _ => {
                state.next_id += 1;
                format!("remote_{}", state.next_id)
            }
        };
        state
            .documents
            .entry(collection.to_string())
            .or_default()
            .insert(key.clone(), payload.clone());
        Ok(key)
    }

    async fn update(&self, collection: &str, id: &str, payload: &Payload) -> RemoteResult<()> {
        self.begin(RemoteCall::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            payload: payload.clone(),
        })
        .await?;

        let mut state = self.state();
        match state
            .documents
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
        {
            Some(doc) => {
                *doc = payload.clone();
                Ok(())
            }
            None => Err(RemoteError::NotFound(format!("{collection}/{id}"))),
        }
    }

    async fn delete(&self, collection: &str, id: &str) -> RemoteResult<()> {
        self.begin(RemoteCall::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        })
        .await?;

        let mut state = self.state();
        match state
            .documents
            .get_mut(collection)
            .and_then(|docs| docs.remove(id))
        {
            Some(_) => Ok(()),
            None => Err(RemoteError::NotFound(format!("{collection}/{id}"))),
        }
    }

    async fn get(&self, collection: &str, id: &str) -> RemoteResult<Option<Payload>> {
        self.begin(RemoteCall::Get {
            collection: collection.to_string(),
            id: id.to_string(),
        })
        .await?;
        Ok(self.document(collection, id))
    }

    async fn subscribe(&self, collection: &str) -> RemoteResult<mpsc::Receiver<RemoteChange>> {
        self.begin(RemoteCall::Subscribe {
            collection: collection.to_string(),
        })
        .await?;

        let (tx, rx) = mpsc::channel(64);
        self.state()
            .subscribers
            .entry(collection.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}

/// An [`AuthProvider`] with a settable flag.
#[derive(Debug)]
pub struct StaticAuth {
    authenticated: AtomicBool,
}

impl StaticAuth {
    pub fn new(authenticated: bool) -> Self {
        Self {
            authenticated: AtomicBool::new(authenticated),
        }
    }

    pub fn set(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::SeqCst);
    }
}

impl AuthProvider for StaticAuth {
    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }
}
