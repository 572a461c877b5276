//! BuddyService behaviour over the in-memory backend.
//!
//! The UI flows end to end: reads fill the cache once, buddy selection and
//! session deletion show up immediately and fall back on failure, and
//! settled writes refresh dependent lists in the background.

use std::sync::Arc;
use std::time::Duration;

use buddy_cache::{CacheConfig, FetchStatus};
use buddy_client::{BuddyService, Identity, IdentityProvider, StaticIdentity};
use buddy_core::keys;
use buddy_test_utils::{
    all_buddies, luna, oliver, personality, three_sessions, zara, ApiError, Call, FakeBackend,
    SessionId, UserId,
};

fn user() -> UserId {
    UserId::from("u1")
}

fn service_with(backend: FakeBackend) -> (BuddyService, Arc<FakeBackend>, Arc<StaticIdentity>) {
    let backend = Arc::new(backend);
    let identity = Arc::new(StaticIdentity::new(Identity::new(user()).with_token("jwt")));
    let service = BuddyService::new(
        Arc::clone(&backend) as Arc<dyn buddy_test_utils::BuddyBackend>,
        Arc::clone(&identity) as Arc<dyn IdentityProvider>,
        CacheConfig::default(),
    );
    (service, backend, identity)
}

/// Let background refetches run.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

// ============================================================================
// READS
// ============================================================================

#[tokio::test]
async fn reads_are_cached_per_staleness_window() {
    let (service, backend, _) = service_with(
        FakeBackend::with_fixtures()
            .with_sessions(&user(), three_sessions())
            .with_personality(personality("u1")),
    );

    assert_eq!(service.buddies().await.unwrap(), all_buddies());
    assert_eq!(service.buddies().await.unwrap(), all_buddies());
    assert_eq!(service.sessions().await.unwrap(), three_sessions());
    assert_eq!(service.personality().await.unwrap(), Some(personality("u1")));
    assert!(service.health().await.unwrap().is_healthy());

    assert_eq!(backend.calls(Call::ListBuddies), 1);
    assert_eq!(backend.calls(Call::ListSessions), 1);
    assert_eq!(backend.calls(Call::Personality), 1);
}

#[tokio::test]
async fn concurrent_session_reads_issue_one_request() {
    let (service, backend, _) = service_with(
        FakeBackend::with_fixtures()
            .with_sessions(&user(), three_sessions())
            .with_latency(Duration::from_millis(20)),
    );

    let (a, b) = tokio::join!(service.sessions(), service.sessions());

    assert_eq!(a.unwrap(), three_sessions());
    assert_eq!(b.unwrap(), three_sessions());
    assert_eq!(backend.calls(Call::ListSessions), 1);
}

#[tokio::test]
async fn ui_sessions_round_trip_to_raw() {
    let (service, _, _) =
        service_with(FakeBackend::with_fixtures().with_sessions(&user(), three_sessions()));
    let ui = service.ui_sessions().await.unwrap();
    assert_eq!(ui[0].icon, "briefcase");
    assert_eq!(ui[1].icon, "map");
    let raw: Vec<_> = ui.into_iter().map(|s| s.into_raw()).collect();
    assert_eq!(raw, three_sessions());
}

#[tokio::test]
async fn failed_refresh_keeps_last_known_sessions() {
    let (service, backend, _) =
        service_with(FakeBackend::with_fixtures().with_sessions(&user(), three_sessions()));
    service.sessions().await.unwrap();

    backend.fail_next(Call::ListSessions, ApiError::network("offline"));
    service.cache().invalidate(keys::sessions(&user()).key());

    assert_eq!(service.sessions().await.unwrap(), three_sessions());
    let entry = service.cache().get(&keys::sessions(&user())).unwrap();
    assert_eq!(entry.status, FetchStatus::Error);
    assert_eq!(entry.last_error, Some(ApiError::network("offline")));
}

#[tokio::test]
async fn first_load_failure_surfaces_error() {
    let (service, backend, _) = service_with(FakeBackend::with_fixtures());
    backend.fail_next(Call::SelectedBuddy, ApiError::server(503, "warming up"));
    assert_eq!(
        service.selected_buddy().await.unwrap_err(),
        ApiError::server(503, "warming up")
    );
}

// ============================================================================
// BUDDY SELECTION
// ============================================================================

#[tokio::test]
async fn failed_selection_restores_previous_and_surfaces_error() {
    let (service, backend, _) =
        service_with(FakeBackend::with_fixtures().with_selected(&user(), &oliver().id));
    assert_eq!(service.selected_buddy().await.unwrap(), Some(oliver()));

    backend.fail_next(Call::SelectBuddy, ApiError::server(500, "write failed"));
    let err = service.select_buddy(&luna().id).await.unwrap_err();

    assert_eq!(err, ApiError::server(500, "write failed"));
    assert_eq!(
        service.cache().value(&keys::selected_buddy(&user())),
        Some(Some(oliver()))
    );
    settle().await;
    assert_eq!(service.selected_buddy().await.unwrap(), Some(oliver()));
}

#[tokio::test]
async fn failure_after_success_keeps_the_success() {
    let (service, backend, _) =
        service_with(FakeBackend::with_fixtures().with_selected(&user(), &oliver().id));
    service.selected_buddy().await.unwrap();

    service.select_buddy(&luna().id).await.unwrap();
    backend.fail_next(Call::SelectBuddy, ApiError::server(500, "write failed"));
    assert!(service.select_buddy(&zara().id).await.is_err());

    assert_eq!(
        service.cache().value(&keys::selected_buddy(&user())),
        Some(Some(luna()))
    );
    settle().await;
    assert_eq!(service.selected_buddy().await.unwrap(), Some(luna()));
    assert_eq!(backend.selected_of(&user()), Some(luna().id));
}

#[tokio::test]
async fn selection_refreshes_sessions() {
    let (service, backend, _) =
        service_with(FakeBackend::with_fixtures().with_sessions(&user(), three_sessions()));
    service.sessions().await.unwrap();

    service.select_buddy(&zara().id).await.unwrap();
    settle().await;

    assert_eq!(backend.calls(Call::ListSessions), 2);
    assert!(!service.cache().get(&keys::sessions(&user())).unwrap().is_invalidated);
}

#[tokio::test]
async fn unknown_buddy_is_rejected_without_mutating() {
    let (service, backend, _) = service_with(FakeBackend::with_fixtures());
    let err = service
        .select_buddy(&buddy_test_utils::BuddyId::from("ghost"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(backend.calls(Call::SelectBuddy), 0);
    assert!(service.cache().get(&keys::selected_buddy(&user())).is_none());
}

// ============================================================================
// SESSIONS
// ============================================================================

#[tokio::test]
async fn delete_session_is_optimistic_and_reverts_on_failure() {
    let (service, backend, _) = service_with(
        FakeBackend::with_fixtures()
            .with_sessions(&user(), three_sessions())
            .with_latency(Duration::from_millis(20)),
    );
    service.sessions().await.unwrap();
    backend.fail_next(Call::DeleteSession, ApiError::server(500, "locked"));

    let cache = service.cache().clone();
    let peek = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.value(&keys::sessions(&user()))
    });
    let result = service.delete_session(&SessionId::from("s2")).await;

    let during: Vec<String> = peek
        .await
        .unwrap()
        .unwrap()
        .into_iter()
        .map(|s| s.session_id.to_string())
        .collect();
    assert_eq!(during, vec!["s1", "s3"]);
    assert!(result.is_err());
    assert_eq!(
        service.cache().value(&keys::sessions(&user())),
        Some(three_sessions())
    );
}

#[tokio::test]
async fn delete_session_evicts_its_entry() {
    let (service, backend, _) =
        service_with(FakeBackend::with_fixtures().with_sessions(&user(), three_sessions()));
    service.sessions().await.unwrap();
    service
        .cache()
        .set(&keys::session(&SessionId::from("s2")), three_sessions()[1].clone());

    service.delete_session(&SessionId::from("s2")).await.unwrap();
    settle().await;

    assert!(service.cache().get(&keys::session(&SessionId::from("s2"))).is_none());
    let ids: Vec<String> = service
        .sessions()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.session_id.to_string())
        .collect();
    assert_eq!(ids, vec!["s1", "s3"]);
    assert_eq!(backend.sessions_of(&user()).len(), 2);
}

#[tokio::test]
async fn delete_with_uncached_list_writes_nothing_tentative() {
    let (service, backend, _) =
        service_with(FakeBackend::with_fixtures().with_sessions(&user(), three_sessions()));
    let mut events = service.cache().subscribe();

    service.delete_session(&SessionId::from("s2")).await.unwrap();

    assert!(service.cache().get(&keys::sessions(&user())).is_none());
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, buddy_cache::CacheEvent::Updated { .. }));
    }
    assert_eq!(backend.calls(Call::DeleteSession), 1);
    assert_eq!(backend.calls(Call::ListSessions), 0);

    let ids: Vec<String> = service
        .sessions()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.session_id.to_string())
        .collect();
    assert_eq!(ids, vec!["s1", "s3"]);
}

#[tokio::test]
async fn failed_delete_with_uncached_list_leaves_cache_empty() {
    let (service, backend, _) =
        service_with(FakeBackend::with_fixtures().with_sessions(&user(), three_sessions()));
    backend.fail_next(Call::DeleteSession, ApiError::server(500, "locked"));

    let err = service.delete_session(&SessionId::from("s2")).await.unwrap_err();

    assert_eq!(err, ApiError::server(500, "locked"));
    assert!(service.cache().get(&keys::sessions(&user())).is_none());
    assert_eq!(service.sessions().await.unwrap(), three_sessions());
}

#[tokio::test]
async fn chat_and_processing_mark_sessions_stale() {
    let (service, backend, _) = service_with(
        FakeBackend::with_fixtures()
            .with_sessions(&user(), three_sessions())
            .with_selected(&user(), &luna().id),
    );
    service.sessions().await.unwrap();
    service.selected_buddy().await.unwrap();

    let reply = service.send_chat("hi there", None).await.unwrap();
    assert_eq!(reply.response, "echo: hi there");
    settle().await;
    assert_eq!(backend.calls(Call::ListSessions), 2);

    let processed = service
        .process_session(&reply.session_id)
        .await
        .unwrap();
    assert_eq!(processed.session_id, reply.session_id);
    settle().await;
    assert_eq!(backend.calls(Call::ListSessions), 3);
}

#[tokio::test]
async fn empty_chat_message_rejected_locally() {
    let (service, backend, _) = service_with(FakeBackend::with_fixtures());
    let err = service.send_chat("   ", None).await.unwrap_err();
    assert!(matches!(err, ApiError::Validation { status: 400, .. }));
    assert_eq!(backend.calls(Call::SendChat), 0);
}

// ============================================================================
// IDENTITY
// ============================================================================

#[tokio::test]
async fn switching_user_drops_cached_data() {
    let (service, backend, identity) = service_with(
        FakeBackend::with_fixtures()
            .with_sessions(&user(), three_sessions())
            .with_sessions(&UserId::from("u2"), Vec::new()),
    );
    assert_eq!(service.sessions().await.unwrap().len(), 3);

    identity.set(Some(Identity::new(UserId::from("u2"))));
    assert!(service.sessions().await.unwrap().is_empty());
    assert!(service.cache().get(&keys::sessions(&user())).is_none());

    identity.set(None);
    assert!(service.sessions().await.unwrap_err().requires_reauth());
    assert_eq!(service.cache().stats().entry_count, 0);
    assert_eq!(backend.calls(Call::ListSessions), 2);
}
