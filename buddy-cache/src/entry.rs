//! Read-side views of cache state.
//!
//! The store owns its entries exclusively. Everything in this module is a
//! snapshot handed out to readers; mutating a snapshot has no effect on the
//! cache.

use buddy_core::{ApiError, QueryKey};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Fetch state of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchStatus {
    #[default]
    Idle,
    Fetching,
    /// The last fetch failed. The previous value, if any, is still served.
    Error,
}

/// Snapshot of a cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    /// Last known value. `None` before the first successful fetch or write.
    pub value: Option<T>,
    /// When the value was last written (fetch completion or direct set).
    pub fetched_at: Option<DateTime<Utc>>,
    /// When the value leaves its staleness window.
    pub stale_at: Option<DateTime<Utc>>,
    pub status: FetchStatus,
    /// Explicitly marked stale; the next access refetches.
    pub is_invalidated: bool,
    pub last_error: Option<ApiError>,
    /// Changes on every value write. Used for identity checks.
    pub version: u64,
}

impl<T> CacheEntry<T> {
    /// Whether this entry should be refetched at `now`.
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        if self.value.is_none() || self.is_invalidated {
            return true;
        }
        match self.stale_at {
            Some(stale_at) => now > stale_at,
            None => true,
        }
    }

    pub fn is_stale(&self) -> bool {
        self.is_stale_at(Utc::now())
    }

    /// Age of the value, zero if never written.
    pub fn age(&self) -> Duration {
        self.fetched_at
            .and_then(|at| Utc::now().signed_duration_since(at).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }
}

/// Change notification emitted by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    /// Value written by a fetch, a direct set, or an optimistic mutation.
    Updated { key: QueryKey },
    Invalidated { key: QueryKey },
    /// A failed mutation restored the value it overwrote.
    RolledBack { key: QueryKey },
    FetchFailed { key: QueryKey, error: ApiError },
    Removed { key: QueryKey },
    Cleared,
}

impl CacheEvent {
    /// Key the event concerns, `None` for `Cleared`.
    pub fn key(&self) -> Option<&QueryKey> {
        match self {
            Self::Updated { key }
            | Self::Invalidated { key }
            | Self::RolledBack { key }
            | Self::FetchFailed { key, .. }
            | Self::Removed { key } => Some(key),
            Self::Cleared => None,
        }
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// `ensure_fresh` calls served from a fresh entry.
    pub hits: u64,
    /// `ensure_fresh` calls that started a fetch.
    pub misses: u64,
    /// `ensure_fresh` calls that joined a fetch already in flight.
    pub joined: u64,
    /// Fetches started, including background refetches.
    pub fetches: u64,
    /// Failed mutations whose tentative value was restored.
    pub rollbacks: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses + self.joined;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
