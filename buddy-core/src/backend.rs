//! Remote resource contract.
//!
//! Every method either returns a typed payload or fails with an [`ApiError`].
//! Implementations must not retry; retry policy belongs to the caller.

use async_trait::async_trait;

use crate::entities::{
    Buddy, BuddyId, ChatRequest, ChatResponse, HealthStatus, PersonalityProfile,
    ProcessSessionRequest, ProcessSessionResponse, Session, SessionId, UserId,
};
use crate::error::ApiError;

#[async_trait]
pub trait BuddyBackend: Send + Sync {
    /// `GET /health`
    async fn health(&self) -> Result<HealthStatus, ApiError>;

    /// `POST /chat`
    async fn send_chat(&self, request: &ChatRequest) -> Result<ChatResponse, ApiError>;

    /// `GET /personality/{userId}`. A missing profile is `Ok(None)`.
    async fn personality(&self, user_id: &UserId) -> Result<Option<PersonalityProfile>, ApiError>;

    /// `GET /sessions/user/{userId}`
    async fn list_sessions(&self, user_id: &UserId) -> Result<Vec<Session>, ApiError>;

    /// `DELETE /sessions/{id}`
    async fn delete_session(&self, session_id: &SessionId) -> Result<(), ApiError>;

    /// `POST /sessions/process`
    async fn process_session(
        &self,
        request: &ProcessSessionRequest,
    ) -> Result<ProcessSessionResponse, ApiError>;

    /// `GET /buddies`
    async fn list_buddies(&self) -> Result<Vec<Buddy>, ApiError>;

    /// `GET /users/{userId}/buddy`. No selection yet is `Ok(None)`.
    async fn selected_buddy(&self, user_id: &UserId) -> Result<Option<Buddy>, ApiError>;

    /// `PUT /users/{userId}/buddy`
    async fn select_buddy(&self, user_id: &UserId, buddy_id: &BuddyId) -> Result<(), ApiError>;
}
