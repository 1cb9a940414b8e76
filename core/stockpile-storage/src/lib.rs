//! Durable local storage for Stockpile.
//!
//! A single SQLite database holds everything that must survive a process
//! restart:
//!
//! - cached domain records, one namespace per collection
//! - the ordered pending-operation log
//! - the `critical_data` mirror of high/critical cache entries
//! - small engine metadata (last sync time, dropped-operation counter)
//!
//! Every call is atomic for a single entry; there are no multi-entry
//! transactions. Writes are durable once the call returns.

mod error;
mod local_store;

pub use error::{StorageError, StorageResult};
pub use local_store::{CriticalEntry, LocalStore, StoreConfig};
