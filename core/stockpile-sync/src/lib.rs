//! Pending-operation queue and remote replay for Stockpile.
//!
//! Writes that cannot be confirmed by the remote store are appended to a
//! durable log. [`SyncManager::drain`] replays that log in enqueue order
//! once the device is online and signed in.
//!
//! ## Components
//!
//! - **Remote**: the [`RemoteStore`] and [`AuthProvider`] collaborator traits
//! - **Retry**: bounded exponential backoff for transient remote failures
//! - **Queue**: the [`SyncManager`], its single-flight drain and auto-drain
//! - **Mock**: an in-memory backend for tests
//!
//! ## Failure handling
//!
//! 1. Transient failures (network, timeout, unavailable) are retried within
//!    a drain per [`RetryPolicy`], then leave the operation queued with its
//!    retry count bumped.
//! 2. An operation that fails in [`SyncConfig::max_retries`] drains is
//!    dropped and reported in [`SyncReport::errors`].
//! 3. Validation and permission rejections drop the operation immediately.
//! 4. A local storage failure aborts the drain.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use stockpile_network::NetworkMonitor;
//! use stockpile_storage::LocalStore;
//! use stockpile_sync::mock::{MockRemoteStore, StaticAuth};
//! use stockpile_sync::{SyncConfig, SyncManager};
//! use stockpile_types::SystemClock;
//!
//! let store = Arc::new(LocalStore::open_in_memory().unwrap());
//! let manager = SyncManager::new(
//!     SyncConfig::default(),
//!     store,
//!     Arc::new(MockRemoteStore::new()),
//!     Arc::new(StaticAuth::new(true)),
//!     NetworkMonitor::new(true),
//!     Arc::new(SystemClock),
//! );
//! assert!(!manager.is_syncing());
//! ```

mod error;
pub mod mock;
mod queue;
mod remote;
mod retry;

pub use error::{RemoteError, RemoteResult, SyncError, SyncResult};
pub use queue::{SyncConfig, SyncFailure, SyncManager, SyncReport, SyncStatus};
pub use remote::{replay, AuthProvider, KeyReassigner, RemoteChange, RemoteStore};
pub use retry::RetryPolicy;
