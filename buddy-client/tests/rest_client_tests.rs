//! REST client tests against a local axum server.
//!
//! Each test binds a router to `127.0.0.1:0` and points a `RestClient` at
//! it, so the real reqwest stack is exercised end to end.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use buddy_client::{ClientConfig, Identity, IdentityProvider, RestClient, StaticIdentity};
use buddy_test_utils::{
    luna, oliver, personality, three_sessions, ApiError, BuddyBackend, BuddyId, ChatRequest,
    ChatResponse, HealthStatus, ProcessSessionRequest, ProcessSessionResponse, SessionId, UserId,
};
use futures_util::stream::{self, StreamExt};
use serde_json::{json, Value};

#[derive(Default)]
struct Seen {
    authorization: Vec<Option<String>>,
    request_ids: Vec<String>,
    bodies: Vec<Value>,
}

type Shared = Arc<Mutex<Seen>>;

fn record(seen: &Shared, headers: &HeaderMap) {
    let mut seen = seen.lock().unwrap();
    seen.authorization.push(
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    );
    if let Some(id) = headers.get("x-request-id").and_then(|v| v.to_str().ok()) {
        seen.request_ids.push(id.to_string());
    }
}

async fn health(State(seen): State<Shared>, headers: HeaderMap) -> Json<Value> {
    record(&seen, &headers);
    Json(json!({ "status": "ok", "version": "1.2.3" }))
}

async fn chat(State(seen): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
    record(&seen, &headers);
    seen.lock().unwrap().bodies.push(body.clone());
    Json(json!({
        "response": format!("you said {}", body["message"].as_str().unwrap_or_default()),
        "session_id": body.get("session_id").cloned().unwrap_or(json!("new-session")),
    }))
}

async fn personality_of(Path(user): Path<String>) -> impl IntoResponse {
    match user.as_str() {
        "u1" => (StatusCode::OK, Json(serde_json::to_value(personality("u1")).unwrap())).into_response(),
        _ => (StatusCode::NOT_FOUND, Json(json!({ "detail": "no profile" }))).into_response(),
    }
}

async fn sessions_of(Path(user): Path<String>) -> impl IntoResponse {
    match user.as_str() {
        "u1" => Json(serde_json::to_value(three_sessions()).unwrap()).into_response(),
        "broken" => (StatusCode::OK, "{\"sessions\": 3}").into_response(),
        "limited" => (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, "3")],
            Json(json!({ "error": "slow down" })),
        )
            .into_response(),
        "expired" => (StatusCode::UNAUTHORIZED, Json(json!({ "message": "token expired" }))).into_response(),
        "forbidden" => StatusCode::FORBIDDEN.into_response(),
        "crash" => (StatusCode::INTERNAL_SERVER_ERROR, "database exploded").into_response(),
        "teapot" => (StatusCode::IM_A_TEAPOT, Json(json!({ "error": { "message": "short and stout" } }))).into_response(),
        _ => Json(json!([])).into_response(),
    }
}

async fn delete_session(Path(id): Path<String>) -> StatusCode {
    if id == "s2" {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn process(Json(request): Json<ProcessSessionRequest>) -> Json<ProcessSessionResponse> {
    Json(ProcessSessionResponse {
        session_id: request.session_id,
        status: "queued".to_string(),
        topic_summary: None,
    })
}

async fn buddies() -> Json<Value> {
    Json(serde_json::to_value(vec![luna(), oliver()]).unwrap())
}

async fn selected(Path(user): Path<String>) -> impl IntoResponse {
    match user.as_str() {
        "u1" => Json(serde_json::to_value(luna()).unwrap()).into_response(),
        "fresh" => Json(Value::Null).into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn select(
    State(seen): State<Shared>,
    Path(_user): Path<String>,
    Json(body): Json<Value>,
) -> StatusCode {
    seen.lock().unwrap().bodies.push(body.clone());
    match body["buddy_id"].as_str() {
        Some("luna") | Some("oliver") => StatusCode::NO_CONTENT,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

async fn slow() -> Json<Value> {
    tokio::time::sleep(Duration::from_millis(500)).await;
    Json(json!({ "status": "ok", "version": null }))
}

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn start() -> (RestClient, Shared) {
    let seen = Shared::default();
    let router = Router::new()
        .route("/health", get(health))
        .route("/chat", post(chat))
        .route("/personality/:user", get(personality_of))
        .route("/sessions/user/:user", get(sessions_of))
        .route("/sessions/process", post(process))
        .route("/sessions/:id", delete(delete_session))
        .route("/buddies", get(buddies))
        .route("/users/:user/buddy", get(selected).put(select))
        .with_state(Arc::clone(&seen));
    let base = serve(router).await;
    (RestClient::new(&ClientConfig::new(base)).unwrap(), seen)
}

fn user(id: &str) -> UserId {
    UserId::from(id)
}

// ============================================================================
// SUCCESS PATHS
// ============================================================================

#[tokio::test]
async fn health_and_request_ids() {
    let (client, seen) = start().await;
    let status = client.health().await.unwrap();
    assert_eq!(
        status,
        HealthStatus {
            status: "ok".to_string(),
            version: Some("1.2.3".to_string())
        }
    );
    client.health().await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.request_ids.len(), 2);
    assert_ne!(seen.request_ids[0], seen.request_ids[1]);
    assert_eq!(seen.authorization, vec![None, None]);
}

#[tokio::test]
async fn sessions_and_buddies_decode() {
    let (client, _) = start().await;
    assert_eq!(client.list_sessions(&user("u1")).await.unwrap(), three_sessions());
    assert!(client.list_sessions(&user("nobody")).await.unwrap().is_empty());
    assert_eq!(client.list_buddies().await.unwrap(), vec![luna(), oliver()]);
}

#[tokio::test]
async fn missing_profile_and_selection_are_none() {
    let (client, _) = start().await;
    assert_eq!(client.personality(&user("u1")).await.unwrap(), Some(personality("u1")));
    assert_eq!(client.personality(&user("u2")).await.unwrap(), None);
    assert_eq!(client.selected_buddy(&user("u1")).await.unwrap(), Some(luna()));
    assert_eq!(client.selected_buddy(&user("fresh")).await.unwrap(), None);
    assert_eq!(client.selected_buddy(&user("unknown")).await.unwrap(), None);
}

#[tokio::test]
async fn chat_sends_optional_fields_only_when_set() {
    let (client, seen) = start().await;
    let reply = client
        .send_chat(&ChatRequest::new(user("u1"), "hello"))
        .await
        .unwrap();
    assert_eq!(
        reply,
        ChatResponse {
            response: "you said hello".to_string(),
            session_id: SessionId::from("new-session"),
        }
    );

    client
        .send_chat(
            &ChatRequest::new(user("u1"), "again")
                .with_session(SessionId::from("s9"))
                .with_buddy(BuddyId::from("luna")),
        )
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.bodies[0], json!({ "user_id": "u1", "message": "hello" }));
    assert_eq!(seen.bodies[1]["session_id"], "s9");
    assert_eq!(seen.bodies[1]["buddy_id"], "luna");
}

#[tokio::test]
async fn delete_select_and_process() {
    let (client, seen) = start().await;
    client.delete_session(&SessionId::from("s2")).await.unwrap();
    client.select_buddy(&user("u1"), &BuddyId::from("oliver")).await.unwrap();
    let processed = client
        .process_session(&ProcessSessionRequest {
            session_id: SessionId::from("s1"),
            user_id: user("u1"),
        })
        .await
        .unwrap();
    assert_eq!(processed.status, "queued");
    assert_eq!(seen.lock().unwrap().bodies, vec![json!({ "buddy_id": "oliver" })]);
}

// ============================================================================
// ERROR TAXONOMY
// ============================================================================

#[tokio::test]
async fn statuses_map_to_taxonomy() {
    let (client, _) = start().await;

    assert_eq!(
        client.list_sessions(&user("limited")).await.unwrap_err(),
        ApiError::RateLimited {
            retry_after_ms: Some(3_000)
        }
    );
    assert_eq!(
        client.list_sessions(&user("expired")).await.unwrap_err(),
        ApiError::Auth {
            message: "token expired".to_string()
        }
    );
    assert!(client
        .list_sessions(&user("forbidden"))
        .await
        .unwrap_err()
        .requires_reauth());
    assert_eq!(
        client.list_sessions(&user("crash")).await.unwrap_err(),
        ApiError::server(500, "database exploded")
    );
    assert_eq!(
        client.list_sessions(&user("teapot")).await.unwrap_err(),
        ApiError::Validation {
            status: 418,
            message: "short and stout".to_string()
        }
    );
    assert!(client
        .delete_session(&SessionId::from("missing"))
        .await
        .unwrap_err()
        .is_not_found());
    assert!(matches!(
        client.select_buddy(&user("u1"), &BuddyId::from("ghost")).await,
        Err(ApiError::Validation { status: 422, .. })
    ));
}

#[tokio::test]
async fn malformed_success_body_is_server_error() {
    let (client, _) = start().await;
    match client.list_sessions(&user("broken")).await {
        Err(ApiError::Server { status, message }) => {
            assert_eq!(status, 200);
            assert!(message.contains("malformed"));
        }
        other => panic!("expected server error, got {:?}", other),
    }
}

/// Sends the status line and part of a body, then drops the connection.
async fn truncated_error() -> impl IntoResponse {
    let head = stream::once(async {
        Ok::<_, std::io::Error>(Bytes::from_static(b"{\"message\":"))
    });
    let abort = stream::once(async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Err::<Bytes, _>(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "upstream went away",
        ))
    });
    (StatusCode::BAD_GATEWAY, Body::from_stream(head.chain(abort)))
}

#[tokio::test]
async fn unreadable_error_body_falls_back_to_status_reason() {
    let base = serve(Router::new().route("/health", get(truncated_error))).await;
    let client = RestClient::new(&ClientConfig::new(base)).unwrap();
    match client.health().await {
        Err(ApiError::Server { status, message }) => {
            assert_eq!(status, 502);
            assert_eq!(message, "Bad Gateway");
        }
        other => panic!("expected server error, got {:?}", other),
    }
}

#[tokio::test]
async fn blank_input_rejected_before_io() {
    let (client, seen) = start().await;
    let err = client.list_sessions(&user("  ")).await.unwrap_err();
    assert!(matches!(err, ApiError::Validation { status: 400, .. }));
    let err = client
        .send_chat(&ChatRequest::new(user("u1"), "   "))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Validation { status: 400, .. }));
    assert!(seen.lock().unwrap().request_ids.is_empty());
}

#[tokio::test]
async fn unreachable_backend_is_network_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let client = RestClient::new(&ClientConfig::new(format!("http://{}", addr))).unwrap();
    assert!(matches!(
        client.health().await,
        Err(ApiError::Network { .. })
    ));
}

#[tokio::test]
async fn timeout_is_network_error() {
    let base = serve(Router::new().route("/health", get(slow))).await;
    let mut config = ClientConfig::new(base);
    config.request_timeout_ms = 50;
    let client = RestClient::new(&config).unwrap();
    match client.health().await {
        Err(ApiError::Network { reason }) => assert!(reason.contains("timed out")),
        other => panic!("expected timeout, got {:?}", other),
    }
}

// ============================================================================
// AUTH HEADERS
// ============================================================================

#[tokio::test]
async fn identity_token_overrides_static_token() {
    let seen = Shared::default();
    let base = serve(
        Router::new()
            .route("/health", get(health))
            .with_state(Arc::clone(&seen)),
    )
    .await;
    let mut config = ClientConfig::new(base);
    config.auth.bearer_token = Some("static".to_string());

    let identity = Arc::new(StaticIdentity::signed_out());
    let client = RestClient::new(&config)
        .unwrap()
        .with_identity(Arc::clone(&identity) as Arc<dyn IdentityProvider>);

    client.health().await.unwrap();
    identity.set(Some(Identity::new(user("u1")).with_token("user-jwt")));
    client.health().await.unwrap();
    identity.set(Some(Identity::new(user("u1"))));
    client.health().await.unwrap();

    assert_eq!(
        seen.lock().unwrap().authorization,
        vec![
            Some("Bearer static".to_string()),
            Some("Bearer user-jwt".to_string()),
            Some("Bearer static".to_string()),
        ]
    );
}
