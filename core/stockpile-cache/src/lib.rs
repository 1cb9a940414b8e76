//! In-process cache for Stockpile.
//!
//! [`CacheManager`] is a read-through cache with per-entry TTLs, priority
//! tiers and capacity-bounded eviction (expired entries first, then least
//! recently accessed). Entries with [`Priority::High`] or
//! [`Priority::Critical`] are additionally written to a durable [`Mirror`]
//! so they survive eviction and process restarts, and can be served stale
//! while offline.

mod entry;
mod error;
mod manager;
mod mirror;

pub use entry::{CacheConfig, CacheEntry, CacheOptions, CacheStats, Priority, Served};
pub use error::{CacheError, CacheResult};
pub use manager::CacheManager;
pub use mirror::{Mirror, StoreMirror};
