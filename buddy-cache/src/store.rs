//! Process-wide query cache.
//!
//! One [`QueryCache`] holds the last known value of every remote resource,
//! keyed by [`QueryKey`]. Values are stored type-erased and read back through
//! [`TypedKey`]. All state sits behind a single mutex that is never held
//! across an `.await`, so every cache operation is atomic with respect to
//! every other one. The only suspension point is the fetcher itself.
//!
//! # Fetch deduplication
//!
//! A fetch is a [`Shared`] future stored on the entry. Concurrent
//! `ensure_fresh` calls for the same key join it instead of starting a new
//! request. The fetch is also spawned onto the runtime, so it completes and
//! updates the entry even if every caller stops waiting.
//!
//! # Write identity
//!
//! Every value write takes a fresh version from a process-wide counter.
//! Fetch completion and mutation rollback compare versions before writing,
//! which keeps a late response or a late failure from clobbering a newer
//! value.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use buddy_core::{ApiError, QueryKey, TypedKey};
use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::entry::{CacheEntry, CacheEvent, CacheStats, FetchStatus};

type ErasedValue = Arc<dyn Any + Send + Sync>;
type FetchResult = Result<ErasedValue, ApiError>;
type ErasedFetcher = Arc<dyn Fn() -> BoxFuture<'static, FetchResult> + Send + Sync>;
type InFlight = Shared<BoxFuture<'static, FetchResult>>;

/// Tentative write of a mutation that has not settled yet.
struct PendingWrite {
    mutation_id: u64,
    /// Version the mutation overwrote.
    base_version: u64,
    /// Version of the tentative value.
    written_version: u64,
    /// Value restored if the mutation fails while its write is current.
    previous: Option<ErasedValue>,
}

/// The shared request currently out for a key.
struct FetchInFlight {
    id: u64,
    /// Entry version when the request went out.
    base_version: u64,
    /// A tentative write was pending, or landed, while the request was out.
    /// Its response may predate that mutation.
    overlapped: bool,
    future: InFlight,
}

impl FetchInFlight {
    /// Whether the response can no longer be stored once mutations settle.
    fn is_outdated(&self, version: u64) -> bool {
        self.overlapped || self.base_version != version
    }
}

#[derive(Default)]
struct Slot {
    value: Option<ErasedValue>,
    version: u64,
    fetched_at: Option<DateTime<Utc>>,
    invalidated: bool,
    status: FetchStatus,
    last_error: Option<ApiError>,
    fetcher: Option<ErasedFetcher>,
    in_flight: Option<FetchInFlight>,
    pending: Vec<PendingWrite>,
}

/// Handle for one in-flight optimistic mutation.
///
/// Created by the tentative write and consumed by exactly one of
/// [`QueryCache::commit`] or [`QueryCache::rollback`].
#[derive(Debug)]
pub struct MutationContext {
    key: QueryKey,
    mutation_id: u64,
    written_version: u64,
}

impl MutationContext {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Version of the tentative value this mutation wrote.
    pub fn written_version(&self) -> u64 {
        self.written_version
    }
}

/// What a rollback did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// The entry still held this mutation's value; the previous value is back.
    Restored,
    /// A later mutation that has not settled overwrote this one. It inherits
    /// this mutation's previous value, so its own rollback (if any) restores
    /// past the failed write.
    HandedOff,
    /// The entry was overwritten by a settled write or evicted. Nothing to do.
    Skipped,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    joined: AtomicU64,
    fetches: AtomicU64,
    rollbacks: AtomicU64,
}

struct Inner {
    slots: Mutex<HashMap<QueryKey, Slot>>,
    config: CacheConfig,
    events: broadcast::Sender<CacheEvent>,
    counters: Counters,
    sequence: AtomicU64,
}

/// Shared, cloneable handle to the process-wide cache.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<Inner>,
}

impl QueryCache {
    pub fn new(config: CacheConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                config,
                events,
                counters: Counters::default(),
                sequence: AtomicU64::new(0),
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    /// Snapshot of the entry for `key`. Never blocks on I/O.
    pub fn get<T>(&self, key: &TypedKey<T>) -> Option<CacheEntry<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let slots = self.inner.lock();
        let slot = slots.get(key.key())?;
        let value = match &slot.value {
            Some(erased) => Some(downcast::<T>(key.key(), erased)?),
            None => None,
        };
        Some(CacheEntry {
            value,
            fetched_at: slot.fetched_at,
            stale_at: slot.fetched_at.map(|at| at + self.stale_window()),
            status: slot.status,
            is_invalidated: slot.invalidated,
            last_error: slot.last_error.clone(),
            version: slot.version,
        })
    }

    /// Last known value for `key`, if any.
    pub fn value<T>(&self, key: &TypedKey<T>) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.get(key).and_then(|entry| entry.value)
    }

    /// Overwrite the value and reset its fetch time.
    pub fn set<T>(&self, key: &TypedKey<T>, value: T)
    where
        T: Send + Sync + 'static,
    {
        let version = self.inner.next_sequence();
        {
            let mut slots = self.inner.lock();
            let slot = slots.entry(key.key().clone()).or_default();
            slot.write(Arc::new(value), version);
        }
        debug!(key = %key, version, "cache set");
        self.inner.emit(CacheEvent::Updated {
            key: key.key().clone(),
        });
    }

    /// Mark `key` stale without clearing its value.
    ///
    /// Returns true only when the entry exists and was not already
    /// invalidated, so repeated calls are no-ops.
    pub fn invalidate(&self, key: &QueryKey) -> bool {
        let newly = {
            let mut slots = self.inner.lock();
            match slots.get_mut(key) {
                Some(slot) if !slot.invalidated => {
                    slot.invalidated = true;
                    true
                }
                _ => false,
            }
        };
        if newly {
            debug!(key = %key, "cache invalidated");
            self.inner
                .emit(CacheEvent::Invalidated { key: key.clone() });
        }
        newly
    }

    /// Invalidate every key starting with `prefix`. Returns the keys that
    /// were newly invalidated.
    pub fn invalidate_matching(&self, prefix: &QueryKey) -> Vec<QueryKey> {
        let keys: Vec<QueryKey> = {
            let slots = self.inner.lock();
            slots
                .keys()
                .filter(|key| key.starts_with(prefix))
                .cloned()
                .collect()
        };
        keys.into_iter().filter(|key| self.invalidate(key)).collect()
    }

    /// Evict `key`. Used when the resource itself was deleted.
    pub fn remove(&self, key: &QueryKey) -> bool {
        let removed = self.inner.lock().remove(key).is_some();
        if removed {
            debug!(key = %key, "cache entry removed");
            self.inner.emit(CacheEvent::Removed { key: key.clone() });
        }
        removed
    }

    /// Drop every entry. In-flight fetches complete into nothing.
    pub fn clear(&self) {
        let count = {
            let mut slots = self.inner.lock();
            let count = slots.len();
            slots.clear();
            count
        };
        debug!(entries = count, "cache cleared");
        self.inner.emit(CacheEvent::Cleared);
    }

    pub fn keys(&self) -> Vec<QueryKey> {
        self.inner.lock().keys().cloned().collect()
    }

    pub fn stats(&self) -> CacheStats {
        let counters = &self.inner.counters;
        CacheStats {
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            joined: counters.joined.load(Ordering::Relaxed),
            fetches: counters.fetches.load(Ordering::Relaxed),
            rollbacks: counters.rollbacks.load(Ordering::Relaxed),
            entry_count: self.inner.lock().len() as u64,
        }
    }

    /// Return the cached value if it is inside its staleness window,
    /// otherwise fetch it.
    ///
    /// Concurrent calls for the same key share one fetch. The fetcher is
    /// remembered on the entry and reused by background refetches.
    ///
    /// If the fetch fails and a previous value exists, that value is
    /// returned and the entry is left with `FetchStatus::Error`. Only a
    /// failure with nothing cached surfaces as `Err`.
    pub async fn ensure_fresh<T, F, Fut>(&self, key: &TypedKey<T>, fetcher: F) -> Result<T, ApiError>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let erased: ErasedFetcher = Arc::new(move || {
            let fut = fetcher();
            async move { fut.await.map(|value| Arc::new(value) as ErasedValue) }.boxed()
        });

        let in_flight = {
            let mut slots = self.inner.lock();
            let slot = slots.entry(key.key().clone()).or_default();
            slot.fetcher = Some(Arc::clone(&erased));

            let fresh = if self.inner.is_fresh(slot) {
                slot.value.as_ref().and_then(|v| downcast::<T>(key.key(), v))
            } else {
                None
            };

            if let Some(value) = fresh {
                self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(value);
            }

            match &slot.in_flight {
                Some(fetch) => {
                    self.inner.counters.joined.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, "joining in-flight fetch");
                    fetch.future.clone()
                }
                None => {
                    self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
                    Inner::start_fetch(&self.inner, key.key(), slot, erased)
                }
            }
        };

        let result = in_flight.await;
        let current = self.value(key);
        match result {
            Ok(fetched) => match current {
                Some(value) => Ok(value),
                // Entry evicted while fetching; hand back what was fetched.
                None => downcast::<T>(key.key(), &fetched).ok_or_else(|| {
                    ApiError::server(0, format!("cached value for {} has unexpected type", key))
                }),
            },
            Err(err) => current.ok_or(err),
        }
    }

    /// Refetch `key` in the background with its remembered fetcher.
    ///
    /// An in-flight fetch whose response could predate a mutation or a
    /// newer write is superseded. Returns false when nothing was started:
    /// no fetcher has been registered, a current fetch is already in
    /// flight, a mutation is still pending (its settlement refetches), or
    /// no tokio runtime is available to drive it.
    pub fn refetch_in_background(&self, key: &QueryKey) -> bool {
        if tokio::runtime::Handle::try_current().is_err() {
            debug!(key = %key, "no runtime, skipping background refetch");
            return false;
        }
        let mut slots = self.inner.lock();
        let Some(slot) = slots.get_mut(key) else {
            return false;
        };
        if !slot.pending.is_empty() {
            debug!(
                key = %key,
                pending = slot.pending.len(),
                "mutation pending, deferring refetch"
            );
            return false;
        }
        if let Some(fetch) = &slot.in_flight {
            if !fetch.is_outdated(slot.version) {
                return false;
            }
            debug!(key = %key, fetch_id = fetch.id, "superseding outdated fetch");
        }
        let Some(fetcher) = slot.fetcher.clone() else {
            return false;
        };
        debug!(key = %key, "background refetch");
        Inner::start_fetch(&self.inner, key, slot, fetcher);
        true
    }

    /// Write a tentative value computed from the current one.
    ///
    /// The current value is remembered as the mutation's previous value.
    /// The write happens before this returns, ahead of any network I/O.
    pub fn write_tentative<T, U>(&self, key: &TypedKey<T>, make: U) -> MutationContext
    where
        T: Clone + Send + Sync + 'static,
        U: FnOnce(Option<T>) -> T,
    {
        let written_version = self.inner.next_sequence();
        let mutation_id = self.inner.next_sequence();
        {
            let mut slots = self.inner.lock();
            let slot = slots.entry(key.key().clone()).or_default();
            let previous = slot.value.clone();
            let current = previous
                .as_ref()
                .and_then(|value| downcast::<T>(key.key(), value));
            let base_version = slot.version;
            if let Some(fetch) = slot.in_flight.as_mut() {
                fetch.overlapped = true;
            }
            slot.write(Arc::new(make(current)), written_version);
            slot.pending.push(PendingWrite {
                mutation_id,
                base_version,
                written_version,
                previous,
            });
        }
        debug!(key = %key, mutation_id, version = written_version, "tentative write");
        self.inner.emit(CacheEvent::Updated {
            key: key.key().clone(),
        });
        MutationContext {
            key: key.key().clone(),
            mutation_id,
            written_version,
        }
    }

    /// The remote call succeeded; the tentative value stands.
    pub fn commit(&self, ctx: MutationContext) {
        let mut slots = self.inner.lock();
        if let Some(slot) = slots.get_mut(&ctx.key) {
            slot.pending.retain(|p| p.mutation_id != ctx.mutation_id);
        }
        debug!(key = %ctx.key, mutation_id = ctx.mutation_id, "mutation committed");
    }

    /// The remote call failed; undo the tentative write if it is still ours.
    pub fn rollback(&self, ctx: MutationContext) -> RollbackOutcome {
        let outcome = {
            let mut slots = self.inner.lock();
            match slots.get_mut(&ctx.key) {
                Some(slot) => slot.rollback(ctx.mutation_id),
                None => RollbackOutcome::Skipped,
            }
        };
        debug!(key = %ctx.key, mutation_id = ctx.mutation_id, ?outcome, "mutation rolled back");
        if outcome == RollbackOutcome::Restored {
            self.inner.counters.rollbacks.fetch_add(1, Ordering::Relaxed);
            self.inner.emit(CacheEvent::RolledBack { key: ctx.key });
        }
        outcome
    }

    fn stale_window(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.inner.config.stale_time).unwrap_or(chrono::Duration::MAX)
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("config", &self.inner.config)
            .field("entries", &self.inner.lock().len())
            .finish()
    }
}

impl Slot {
    fn write(&mut self, value: ErasedValue, version: u64) {
        self.value = Some(value);
        self.version = version;
        self.fetched_at = Some(Utc::now());
        self.invalidated = false;
    }

    fn rollback(&mut self, mutation_id: u64) -> RollbackOutcome {
        let Some(index) = self.pending.iter().position(|p| p.mutation_id == mutation_id) else {
            return RollbackOutcome::Skipped;
        };
        let record = self.pending.remove(index);

        if self.version == record.written_version {
            // The restored value keeps its own version, so an earlier
            // pending write it covered still recognises it.
            self.value = record.previous;
            self.version = record.base_version;
            return RollbackOutcome::Restored;
        }

        match self
            .pending
            .iter_mut()
            .find(|p| p.base_version == record.written_version)
        {
            Some(overwriter) => {
                overwriter.previous = record.previous;
                overwriter.base_version = record.base_version;
                RollbackOutcome::HandedOff
            }
            None => RollbackOutcome::Skipped,
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HashMap<QueryKey, Slot>> {
        // Every critical section leaves the map consistent, so a panic in
        // another holder does not invalidate the data.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn emit(&self, event: CacheEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    fn is_fresh(&self, slot: &Slot) -> bool {
        if slot.value.is_none() || slot.invalidated {
            return false;
        }
        match slot.fetched_at {
            Some(at) => {
                let age = Utc::now()
                    .signed_duration_since(at)
                    .to_std()
                    .unwrap_or(std::time::Duration::ZERO);
                age <= self.config.stale_time
            }
            None => false,
        }
    }

    /// Install a new shared fetch on `slot` and drive it on the runtime.
    fn start_fetch(this: &Arc<Self>, key: &QueryKey, slot: &mut Slot, fetcher: ErasedFetcher) -> InFlight {
        let fetch_id = this.next_sequence();
        let weak: Weak<Self> = Arc::downgrade(this);
        let owned_key = key.clone();

        let in_flight = async move {
            let result = fetcher().await;
            if let Some(inner) = weak.upgrade() {
                inner.complete_fetch(&owned_key, fetch_id, &result);
            }
            result
        }
        .boxed()
        .shared();

        slot.in_flight = Some(FetchInFlight {
            id: fetch_id,
            base_version: slot.version,
            overlapped: !slot.pending.is_empty(),
            future: in_flight.clone(),
        });
        slot.status = FetchStatus::Fetching;
        this.counters.fetches.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, fetch_id, "fetch started");

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let driver = in_flight.clone();
            handle.spawn(async move {
                let _ = driver.await;
            });
        }
        in_flight
    }

    fn complete_fetch(&self, key: &QueryKey, fetch_id: u64, result: &FetchResult) {
        let event = {
            let mut slots = self.lock();
            let Some(slot) = slots.get_mut(key) else {
                debug!(key = %key, fetch_id, "fetch completed for evicted entry");
                return;
            };
            let fetch = match slot.in_flight.take() {
                Some(fetch) if fetch.id == fetch_id => fetch,
                other => {
                    slot.in_flight = other;
                    debug!(key = %key, fetch_id, "fetch superseded");
                    return;
                }
            };

            match result {
                Ok(value) => {
                    slot.status = FetchStatus::Idle;
                    if !slot.pending.is_empty() || fetch.is_outdated(slot.version) {
                        // A newer write (tentative or settled) landed while
                        // this request was out. Keep it.
                        debug!(key = %key, fetch_id, "discarding stale fetch result");
                        None
                    } else {
                        slot.write(Arc::clone(value), self.next_sequence());
                        slot.last_error = None;
                        Some(CacheEvent::Updated { key: key.clone() })
                    }
                }
                Err(err) => {
                    slot.status = FetchStatus::Error;
                    slot.last_error = Some(err.clone());
                    warn!(key = %key, error = %err, "fetch failed, keeping last known value");
                    Some(CacheEvent::FetchFailed {
                        key: key.clone(),
                        error: err.clone(),
                    })
                }
            }
        };
        if let Some(event) = event {
            self.emit(event);
        }
    }
}

fn downcast<T>(key: &QueryKey, value: &ErasedValue) -> Option<T>
where
    T: Clone + 'static,
{
    let typed = value.downcast_ref::<T>().cloned();
    if typed.is_none() {
        warn!(key = %key, "cached value has a different type than requested");
    }
    typed
}
