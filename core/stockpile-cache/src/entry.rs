//! Cache entry, options and configuration types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use stockpile_types::Timestamp;

/// Priority tier of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Whether entries of this tier are mirrored to durable storage.
    #[must_use]
    pub const fn is_mirrored(&self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown cache priority: {other}")),
        }
    }
}

/// Per-call options for [`crate::CacheManager::set`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheOptions {
    /// Time-to-live. `None` uses [`CacheConfig::default_ttl_ms`].
    pub ttl: Option<Duration>,
    pub priority: Priority,
}

impl CacheOptions {
    pub fn new(ttl: Duration, priority: Priority) -> Self {
        Self {
            ttl: Some(ttl),
            priority,
        }
    }

    pub fn with_priority(priority: Priority) -> Self {
        Self {
            ttl: None,
            priority,
        }
    }
}

/// A resident cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Serialized value.
    pub data: Vec<u8>,
    pub written_at: Timestamp,
    pub ttl: Duration,
    pub priority: Priority,
    /// Approximate footprint: serialized value plus key.
    pub size_bytes: usize,
    pub access_count: u64,
    pub last_accessed_at: Timestamp,
    /// Monotonic access sequence, breaks `last_accessed_at` ties.
    pub(crate) recency: u64,
}

impl CacheEntry {
    /// An entry is expired once strictly more than `ttl` has elapsed since
    /// it was written.
    #[must_use]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now.since(self.written_at) > self.ttl
    }
}

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Upper bound on the summed `size_bytes` of resident entries.
    pub max_cache_size: usize,
    /// TTL applied when [`CacheOptions::ttl`] is `None`, in milliseconds.
    pub default_ttl_ms: u64,
    /// Period of the background expiry sweep, in milliseconds.
    pub cleanup_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_cache_size: 50 * 1024 * 1024, // 50 MB
            default_ttl_ms: 5 * 60 * 1000,
            cleanup_interval_ms: 60_000,
        }
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Fraction of lookups served from memory or the mirror.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Where a value returned by [`crate::CacheManager::get_or_fetch`] came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Served<T> {
    /// Fetched just now and cached.
    Fresh(T),
    /// A live cache (or mirror) hit.
    Cached(T),
    /// An expired mirrored copy, served because fetching was impossible.
    Stale(T),
}

impl<T> Served<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Fresh(v) | Self::Cached(v) | Self::Stale(v) => v,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale(_))
    }
}
