//! Buddy Core - Entity Types, Query Keys and Errors
//!
//! Shared vocabulary for the buddy client workspace: the entities returned by
//! the backend, the structural keys the cache is indexed by, the remote error
//! taxonomy, and the [`BuddyBackend`] contract implemented by the REST client.

pub mod backend;
pub mod entities;
pub mod error;
pub mod key;
pub mod observer;
pub mod session_view;

pub use backend::BuddyBackend;
pub use entities::{
    Buddy, BuddyId, BuddyPersonality, ChatRequest, ChatResponse, HealthStatus,
    PersonalityProfile, ProcessSessionRequest, ProcessSessionResponse, SelectBuddyRequest,
    Session, SessionId, UserId, VoiceProfile,
};
pub use error::{ApiError, BuddyError, BuddyResult, ConfigError, ValidationError};
pub use key::{keys, QueryKey, TypedKey};
pub use observer::{ObserverId, Observers, SpeakingState};
pub use session_view::{enhance_session, enhance_sessions_for_ui, UiSession};
