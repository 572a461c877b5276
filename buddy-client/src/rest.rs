//! HTTP implementation of [`BuddyBackend`].
//!
//! Every response is translated into the [`ApiError`] taxonomy here; nothing
//! reqwest-specific leaves this module. There are no retries and no
//! fallbacks: one call, one request.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use buddy_core::{
    ApiError, Buddy, BuddyBackend, BuddyId, ChatRequest, ChatResponse, HealthStatus,
    PersonalityProfile, ProcessSessionRequest, ProcessSessionResponse, SelectBuddyRequest,
    Session, SessionId, UserId, ValidationError,
};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, RETRY_AFTER};
use reqwest::{Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::identity::IdentityProvider;

const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct RestClient {
    client: reqwest::Client,
    base_url: Url,
    timeout: Duration,
    static_token: Option<String>,
    identity: Option<Arc<dyn IdentityProvider>>,
}

impl RestClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let base_url = Url::parse(config.api_base_url.trim()).map_err(|e| {
            buddy_core::ConfigError::InvalidValue {
                field: "api_base_url",
                reason: e.to_string(),
            }
        })?;
        let timeout = config.request_timeout();
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            timeout,
            static_token: config.auth.bearer_token.clone(),
            identity: None,
        })
    }

    /// Take bearer tokens from `provider`, falling back to the configured
    /// static token when the provider has none.
    pub fn with_identity(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(provider);
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::Validation {
                status: 0,
                message: format!("base URL {} cannot carry a path", self.base_url),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let token = self
            .identity
            .as_ref()
            .and_then(|provider| provider.current())
            .and_then(|identity| identity.access_token().map(str::to_string))
            .or_else(|| self.static_token.clone());
        if let Some(token) = token {
            match HeaderValue::from_str(&format!("Bearer {}", token)) {
                Ok(mut value) => {
                    value.set_sensitive(true);
                    headers.insert(AUTHORIZATION, value);
                }
                Err(_) => warn!("bearer token contains invalid header characters, sending without it"),
            }
        }
        if let Ok(value) = HeaderValue::from_str(&uuid::Uuid::now_v7().to_string()) {
            headers.insert(REQUEST_ID_HEADER, value);
        }
        headers
    }

    async fn send(&self, method: Method, segments: &[&str], body: Option<&dyn ErasedBody>) -> Result<Response, ApiError> {
        let url = self.endpoint(segments)?;
        let path = url.path().to_string();
        let mut request: RequestBuilder = self
            .client
            .request(method.clone(), url)
            .headers(self.headers());
        if let Some(body) = body {
            request = body.attach(request);
        }

        debug!(%method, %path, "request");
        let response = request.send().await.map_err(|e| self.transport_error(&e))?;
        let status = response.status();
        debug!(%method, %path, status = status.as_u16(), "response");

        if status.is_success() {
            return Ok(response);
        }

        let retry_after_ms = parse_retry_after_ms(response.headers());
        let text = match response.text().await {
            Ok(text) => text,
            Err(err) => {
                debug!(
                    %method,
                    %path,
                    error = %err,
                    "could not read error body, using status reason"
                );
                String::new()
            }
        };
        let error = ApiError::from_status(
            status.as_u16(),
            &path,
            error_message(&text, status.canonical_reason()),
            retry_after_ms,
        );
        if !error.is_not_found() {
            warn!(%method, %path, error = %error, "request failed");
        }
        Err(error)
    }

    fn transport_error(&self, err: &reqwest::Error) -> ApiError {
        if err.is_timeout() {
            ApiError::network(format!("request timed out after {}ms", self.timeout.as_millis()))
        } else {
            ApiError::network(err.to_string())
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, ApiError> {
        let response = self.send(Method::GET, segments, None).await?;
        decode(response).await
    }

    /// GET where a 404 means "nothing there yet" rather than an error.
    async fn get_optional<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<Option<T>, ApiError> {
        match self.get_json::<Option<T>>(segments).await {
            Err(ApiError::NotFound { .. }) => Ok(None),
            other => other,
        }
    }

    async fn post_json<T, B>(&self, segments: &[&str], body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + Sync,
    {
        let response = self
            .send(Method::POST, segments, Some(&JsonBody(body)))
            .await?;
        decode(response).await
    }
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("base_url", &self.base_url.as_str())
            .field("timeout", &self.timeout)
            .field("static_token", &self.static_token.as_ref().map(|_| "[REDACTED]"))
            .field("identity", &self.identity.is_some())
            .finish()
    }
}

#[async_trait]
impl BuddyBackend for RestClient {
    async fn health(&self) -> Result<HealthStatus, ApiError> {
        self.get_json(&["health"]).await
    }

    async fn send_chat(&self, request: &ChatRequest) -> Result<ChatResponse, ApiError> {
        request.validate()?;
        self.post_json(&["chat"], request).await
    }

    async fn personality(&self, user_id: &UserId) -> Result<Option<PersonalityProfile>, ApiError> {
        require(user_id.is_blank(), "user_id")?;
        self.get_optional(&["personality", user_id.as_str()]).await
    }

    async fn list_sessions(&self, user_id: &UserId) -> Result<Vec<Session>, ApiError> {
        require(user_id.is_blank(), "user_id")?;
        self.get_json(&["sessions", "user", user_id.as_str()]).await
    }

    async fn delete_session(&self, session_id: &SessionId) -> Result<(), ApiError> {
        require(session_id.is_blank(), "session_id")?;
        self.send(Method::DELETE, &["sessions", session_id.as_str()], None)
            .await?;
        Ok(())
    }

    async fn process_session(
        &self,
        request: &ProcessSessionRequest,
    ) -> Result<ProcessSessionResponse, ApiError> {
        require(request.session_id.is_blank(), "session_id")?;
        require(request.user_id.is_blank(), "user_id")?;
        self.post_json(&["sessions", "process"], request).await
    }

    async fn list_buddies(&self) -> Result<Vec<Buddy>, ApiError> {
        self.get_json(&["buddies"]).await
    }

    async fn selected_buddy(&self, user_id: &UserId) -> Result<Option<Buddy>, ApiError> {
        require(user_id.is_blank(), "user_id")?;
        self.get_optional(&["users", user_id.as_str(), "buddy"]).await
    }

    async fn select_buddy(&self, user_id: &UserId, buddy_id: &BuddyId) -> Result<(), ApiError> {
        require(user_id.is_blank(), "user_id")?;
        require(buddy_id.is_blank(), "buddy_id")?;
        let body = SelectBuddyRequest {
            buddy_id: buddy_id.clone(),
        };
        self.send(
            Method::PUT,
            &["users", user_id.as_str(), "buddy"],
            Some(&JsonBody(&body)),
        )
        .await?;
        Ok(())
    }
}

/// Request body that can be attached without making `send` generic.
trait ErasedBody: Sync {
    fn attach(&self, request: RequestBuilder) -> RequestBuilder;
}

struct JsonBody<'a, B: ?Sized>(&'a B);

impl<B: Serialize + Sync + ?Sized> ErasedBody for JsonBody<'_, B> {
    fn attach(&self, request: RequestBuilder) -> RequestBuilder {
        request.json(self.0)
    }
}

fn require(blank: bool, field: &str) -> Result<(), ApiError> {
    if blank {
        return Err(ValidationError::RequiredFieldMissing {
            field: field.to_string(),
        }
        .into());
    }
    Ok(())
}

/// Decode a success body. A body that does not match the expected shape is
/// the server's fault, not the caller's.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let status = response.status().as_u16();
    let path = response.url().path().to_string();
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ApiError::network(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| {
        warn!(%path, status, error = %e, "malformed response body");
        ApiError::server(status, format!("malformed response body from {}: {}", path, e))
    })
}

/// Best human-readable message from an error body.
///
/// Accepts `{"message": ..}`, `{"detail": ..}`, `{"error": ".."}` and
/// `{"error": {"message": ..}}`, falling back to the raw text.
fn error_message(body: &str, reason: Option<&str>) -> String {
    let fallback = || {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            reason.unwrap_or("no response body").to_string()
        } else {
            trimmed.to_string()
        }
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return fallback();
    };
    ["message", "detail", "error"]
        .iter()
        .filter_map(|field| value.get(field))
        .find_map(|field| match field {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Object(inner) => inner
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string),
            _ => None,
        })
        .unwrap_or_else(fallback)
}

/// `Retry-After` in seconds (fractional allowed), as milliseconds.
fn parse_retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
        .map(|seconds| (seconds * 1000.0) as u64)
}
