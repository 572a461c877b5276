//! Optimistic mutation coordinator.
//!
//! A mutation writes its tentative value into the cache before the remote
//! call starts, so readers see the change immediately. When the call
//! settles the write is either kept (success) or rolled back (failure), and
//! in both cases the invalidation policy schedules a refetch so the cache
//! converges on server state.

use std::future::Future;

use buddy_core::{ApiError, QueryKey, TypedKey};
use tracing::{debug, warn};

use crate::invalidation::InvalidationPolicy;
use crate::store::{MutationContext, QueryCache, RollbackOutcome};

/// Runs optimistic mutations against a [`QueryCache`].
#[derive(Debug, Clone)]
pub struct MutationCoordinator {
    cache: QueryCache,
    policy: InvalidationPolicy,
}

impl MutationCoordinator {
    pub fn new(cache: QueryCache, policy: InvalidationPolicy) -> Self {
        Self { cache, policy }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn policy(&self) -> &InvalidationPolicy {
        &self.policy
    }

    /// Write `tentative` under `key`, then run `remote`.
    ///
    /// On failure the previous value is restored (when this mutation's write
    /// is still the current one) and the error is returned unchanged.
    pub async fn mutate<T, R, F, Fut>(
        &self,
        key: &TypedKey<T>,
        tentative: T,
        remote: F,
    ) -> Result<R, ApiError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, ApiError>>,
    {
        self.update(key, move |_| tentative, remote).await
    }

    /// Like [`mutate`](Self::mutate), with the tentative value computed from
    /// the current one (which may itself be another mutation's tentative
    /// value).
    pub async fn update<T, R, U, F, Fut>(
        &self,
        key: &TypedKey<T>,
        make: U,
        remote: F,
    ) -> Result<R, ApiError>
    where
        T: Clone + Send + Sync + 'static,
        U: FnOnce(Option<T>) -> T,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, ApiError>>,
    {
        let ctx = self.cache.write_tentative(key, make);
        let mut pending = PendingMutation {
            coordinator: self,
            key: key.key().clone(),
            ctx: Some(ctx),
        };

        let result = remote().await;
        match &result {
            Ok(_) => pending.commit(),
            Err(err) => {
                let outcome = pending.rollback();
                warn!(key = %key, error = %err, ?outcome, "optimistic mutation failed");
            }
        }
        result
    }
}

/// Settles a mutation exactly once.
///
/// If the mutation future is dropped before the remote call returns, the
/// guard rolls the tentative write back.
struct PendingMutation<'a> {
    coordinator: &'a MutationCoordinator,
    key: QueryKey,
    ctx: Option<MutationContext>,
}

impl PendingMutation<'_> {
    fn commit(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            self.coordinator.cache.commit(ctx);
        }
    }

    fn rollback(&mut self) -> Option<RollbackOutcome> {
        self.ctx
            .take()
            .map(|ctx| self.coordinator.cache.rollback(ctx))
    }
}

impl Drop for PendingMutation<'_> {
    fn drop(&mut self) {
        if self.ctx.is_some() {
            let outcome = self.rollback();
            debug!(key = %self.key, ?outcome, "mutation cancelled before settling");
        }
        self.coordinator
            .policy
            .settle(&self.coordinator.cache, &self.key);
    }
}
