//! UI-facing facade over the backend and the cache.
//!
//! Reads go through [`QueryCache::ensure_fresh`] keyed by the signed-in
//! user. Writes go through the [`MutationCoordinator`], so the cache shows
//! the change before the request returns and falls back if it fails.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use buddy_cache::{CacheConfig, InvalidationPolicy, MutationCoordinator, QueryCache};
use buddy_core::{
    enhance_sessions_for_ui, keys, ApiError, Buddy, BuddyBackend, BuddyId, ChatRequest,
    ChatResponse, HealthStatus, PersonalityProfile, ProcessSessionRequest,
    ProcessSessionResponse, Session, SessionId, TypedKey, UiSession, UserId,
};
use tracing::{debug, info};

use crate::identity::IdentityProvider;

pub struct BuddyService {
    backend: Arc<dyn BuddyBackend>,
    identity: Arc<dyn IdentityProvider>,
    mutations: MutationCoordinator,
    /// User the cached data belongs to.
    cached_for: Mutex<Option<UserId>>,
}

impl BuddyService {
    pub fn new(
        backend: Arc<dyn BuddyBackend>,
        identity: Arc<dyn IdentityProvider>,
        config: CacheConfig,
    ) -> Self {
        Self::with_policy(backend, identity, config, InvalidationPolicy::standard())
    }

    pub fn with_policy(
        backend: Arc<dyn BuddyBackend>,
        identity: Arc<dyn IdentityProvider>,
        config: CacheConfig,
        policy: InvalidationPolicy,
    ) -> Self {
        Self {
            backend,
            identity,
            mutations: MutationCoordinator::new(QueryCache::new(config), policy),
            cached_for: Mutex::new(None),
        }
    }

    pub fn cache(&self) -> &QueryCache {
        self.mutations.cache()
    }

    /// Compare the provider's user with the one the cache was filled for.
    ///
    /// On sign-out or a switch to another user every entry is dropped, so
    /// one user's data is never served to the next. Called at the start of
    /// every operation; returns the current user.
    pub fn sync_identity(&self) -> Option<UserId> {
        let current = self.identity.current().map(|identity| identity.user_id);
        let mut cached_for = self
            .cached_for
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *cached_for != current {
            if cached_for.is_some() {
                info!(
                    previous = ?cached_for.as_ref().map(UserId::as_str),
                    current = ?current.as_ref().map(UserId::as_str),
                    "identity changed, clearing cache"
                );
                self.cache().clear();
            }
            *cached_for = current.clone();
        }
        current
    }

    fn user(&self) -> Result<UserId, ApiError> {
        self.sync_identity().ok_or_else(|| ApiError::Auth {
            message: "not signed in".to_string(),
        })
    }

    async fn query<T, F, Fut>(&self, key: &TypedKey<T>, fetch: F) -> Result<T, ApiError>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(Arc<dyn BuddyBackend>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        self.cache()
            .ensure_fresh(key, move || fetch(Arc::clone(&backend)))
            .await
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    pub async fn buddies(&self) -> Result<Vec<Buddy>, ApiError> {
        self.sync_identity();
        self.query(&keys::buddies(), |backend| async move {
            backend.list_buddies().await
        })
        .await
    }

    pub async fn selected_buddy(&self) -> Result<Option<Buddy>, ApiError> {
        let user = self.user()?;
        let key = keys::selected_buddy(&user);
        self.query(&key, move |backend| {
            let user = user.clone();
            async move { backend.selected_buddy(&user).await }
        })
        .await
    }

    pub async fn sessions(&self) -> Result<Vec<Session>, ApiError> {
        let user = self.user()?;
        let key = keys::sessions(&user);
        self.query(&key, move |backend| {
            let user = user.clone();
            async move { backend.list_sessions(&user).await }
        })
        .await
    }

    /// Sessions decorated for display.
    pub async fn ui_sessions(&self) -> Result<Vec<UiSession>, ApiError> {
        let sessions = self.sessions().await?;
        Ok(enhance_sessions_for_ui(&sessions))
    }

    pub async fn personality(&self) -> Result<Option<PersonalityProfile>, ApiError> {
        let user = self.user()?;
        let key = keys::personality(&user);
        self.query(&key, move |backend| {
            let user = user.clone();
            async move { backend.personality(&user).await }
        })
        .await
    }

    pub async fn health(&self) -> Result<HealthStatus, ApiError> {
        self.query(&keys::health(), |backend| async move { backend.health().await })
            .await
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Make `buddy_id` the user's buddy.
    ///
    /// The selection shows up in the cache immediately. If the backend
    /// rejects it, the previous selection comes back and the error is
    /// returned.
    pub async fn select_buddy(&self, buddy_id: &BuddyId) -> Result<(), ApiError> {
        let user = self.user()?;
        let buddy = self
            .buddies()
            .await?
            .into_iter()
            .find(|buddy| &buddy.id == buddy_id)
            .ok_or_else(|| ApiError::not_found(format!("buddy {}", buddy_id)))?;

        debug!(user = %user, buddy = %buddy_id, "selecting buddy");
        let backend = Arc::clone(&self.backend);
        self.mutations
            .mutate(&keys::selected_buddy(&user), Some(buddy), || async move {
                backend.select_buddy(&user, buddy_id).await
            })
            .await
    }

    /// Delete a session, removing it from the cached list right away.
    ///
    /// On success the session's own entry is evicted. On failure the list
    /// is restored. With no list cached there is nothing to edit, so the
    /// delete goes straight to the backend and the list entry is dropped.
    pub async fn delete_session(&self, session_id: &SessionId) -> Result<(), ApiError> {
        let user = self.user()?;
        let list = keys::sessions(&user);
        if self.cache().value(&list).is_none() {
            debug!(
                user = %user,
                session = %session_id,
                "session list not cached, deleting without optimistic write"
            );
            self.backend.delete_session(session_id).await?;
            self.cache().remove(list.key());
            self.cache().remove(keys::session(session_id).key());
            return Ok(());
        }

        let backend = Arc::clone(&self.backend);
        self.mutations
            .update(
                &list,
                |current| {
                    let mut sessions = current.unwrap_or_default();
                    sessions.retain(|s| &s.session_id != session_id);
                    sessions
                },
                || async move { backend.delete_session(session_id).await },
            )
            .await?;
        self.cache().remove(keys::session(session_id).key());
        Ok(())
    }

    /// Send a chat message as the current user to their selected buddy.
    ///
    /// A successful exchange changes the session list, so it is refreshed.
    pub async fn send_chat(
        &self,
        message: impl Into<String>,
        session_id: Option<SessionId>,
    ) -> Result<ChatResponse, ApiError> {
        let user = self.user()?;
        let mut request = ChatRequest::new(user.clone(), message);
        if let Some(session_id) = session_id {
            request = request.with_session(session_id);
        }
        if let Some(Some(buddy)) = self.cache().value(&keys::selected_buddy(&user)) {
            request = request.with_buddy(buddy.id);
        }
        request.validate()?;

        let response = self.backend.send_chat(&request).await?;
        self.refresh(keys::sessions(&user).key());
        Ok(response)
    }

    /// Ask the backend to summarise a finished session.
    pub async fn process_session(
        &self,
        session_id: &SessionId,
    ) -> Result<ProcessSessionResponse, ApiError> {
        let user = self.user()?;
        let request = ProcessSessionRequest {
            session_id: session_id.clone(),
            user_id: user.clone(),
        };
        let response = self.backend.process_session(&request).await?;
        self.refresh(keys::sessions(&user).key());
        self.refresh(keys::session(session_id).key());
        Ok(response)
    }

    fn refresh(&self, key: &buddy_core::QueryKey) {
        self.mutations.policy().settle(self.cache(), key);
    }
}

impl std::fmt::Debug for BuddyService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuddyService")
            .field("cache", self.cache())
            .finish()
    }
}
