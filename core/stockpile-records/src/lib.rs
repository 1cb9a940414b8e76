//! Local-first record services for Stockpile.
//!
//! A [`RecordService`] gives callers one read/write API that behaves the
//! same online and offline. The local commit is the durability boundary;
//! remote confirmation is eventual and reported through [`WriteState`].
//!
//! The [`Stockpile`] engine constructs the durable store, cache and sync
//! queue once and hands out services that share them.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use stockpile_network::NetworkMonitor;
//! use stockpile_records::{Stockpile, StockpileConfig, Transaction, TransactionKind};
//! use stockpile_sync::mock::{MockRemoteStore, StaticAuth};
//!
//! let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
//! rt.block_on(async {
//!     let engine = Stockpile::open(
//!         &StockpileConfig::default(),
//!         Arc::new(MockRemoteStore::new()),
//!         Arc::new(StaticAuth::new(true)),
//!         NetworkMonitor::new(false),
//!     )
//!     .unwrap();
//!
//!     let written = engine
//!         .transactions()
//!         .create(Transaction::new("drill-1", "alice", 1, TransactionKind::Borrow))
//!         .await
//!         .unwrap();
//!     assert!(written.is_pending());
//! });
//! ```

mod engine;
mod error;
mod record;
mod service;
mod transaction;

pub use engine::{Stockpile, StockpileConfig};
pub use error::{RecordError, RecordResult};
pub use record::{Record, WriteState, Written};
pub use service::{RecordService, ServiceContext};
pub use transaction::{Transaction, TransactionKind};
