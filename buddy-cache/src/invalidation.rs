//! Invalidation/refresh policy applied after a mutation settles.

use std::collections::HashMap;

use buddy_core::keys;
use buddy_core::QueryKey;
use tracing::debug;

use crate::store::QueryCache;

/// Declarative map from a mutation's scope to the scopes that depend on it.
///
/// Dependent keys inherit the mutated key's parameters, so a rule
/// `selected-buddy -> sessions` turns `selected-buddy:u1` into
/// `sessions:u1`.
#[derive(Debug, Clone, Default)]
pub struct InvalidationPolicy {
    rules: HashMap<String, Vec<String>>,
}

impl InvalidationPolicy {
    /// Policy with no rules. Settling still invalidates the mutated key.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rules for the buddy resources.
    pub fn standard() -> Self {
        Self::new().on(keys::SELECTED_BUDDY, [keys::SESSIONS])
    }

    /// Add dependents for `scope`.
    pub fn on<I, S>(mut self, scope: impl Into<String>, dependents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rules
            .entry(scope.into())
            .or_default()
            .extend(dependents.into_iter().map(Into::into));
        self
    }

    /// `key` followed by its dependents, without duplicates.
    pub fn dependents(&self, key: &QueryKey) -> Vec<QueryKey> {
        let mut out = vec![key.clone()];
        if let Some(scopes) = self.rules.get(key.scope()) {
            for scope in scopes {
                let dependent = key.rescoped(scope.as_str());
                if !out.contains(&dependent) {
                    out.push(dependent);
                }
            }
        }
        out
    }

    /// Invalidate `key` and its dependents and schedule background refetches.
    /// Never waits on the network.
    ///
    /// A key that was already invalidated is still refetched: an earlier
    /// settlement's fetch may have been discarded because this mutation was
    /// pending. Keys with a current fetch in flight are left to it.
    ///
    /// Returns the keys for which a refetch was started.
    pub fn settle(&self, cache: &QueryCache, key: &QueryKey) -> Vec<QueryKey> {
        let refetched: Vec<QueryKey> = self
            .dependents(key)
            .into_iter()
            .filter(|dependent| {
                cache.invalidate(dependent);
                cache.refetch_in_background(dependent)
            })
            .collect();
        debug!(key = %key, refetched = refetched.len(), "mutation settled");
        refetched
    }
}
