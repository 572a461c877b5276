//! Entities exchanged with the buddy backend.
//!
//! These are read-only to the client core: the backend owns them and the
//! cache only ever holds the last known copy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ValidationError;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: String) -> Self {
                Self(value)
            }

            /// Construct from untrusted input, rejecting blank identifiers.
            pub fn parse(value: impl Into<String>) -> Result<Self, ValidationError> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(ValidationError::RequiredFieldMissing {
                        field: $field.to_string(),
                    });
                }
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Opaque identity supplied by the auth provider.
    UserId,
    "user_id"
);
string_id!(BuddyId, "buddy_id");
string_id!(SessionId, "session_id");

// ============================================================================
// BUDDIES
// ============================================================================

/// Personality a buddy presents in conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuddyPersonality {
    pub mbti_type: String,
    #[serde(default)]
    pub traits: Vec<String>,
    pub description: String,
}

/// Voice settings used for text-to-speech.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceProfile {
    pub accent: String,
    pub gender: String,
    pub elevenlabs_voice_id: String,
}

/// A selectable conversational buddy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Buddy {
    pub id: BuddyId,
    pub name: String,
    pub personality: BuddyPersonality,
    pub voice: VoiceProfile,
    #[serde(default)]
    pub sample_responses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectBuddyRequest {
    pub buddy_id: BuddyId,
}

// ============================================================================
// SESSIONS
// ============================================================================

/// A finished or ongoing conversation session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub topic_summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<u64>,
    #[serde(default)]
    pub message_count: u32,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSessionRequest {
    pub session_id: SessionId,
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSessionResponse {
    pub session_id: SessionId,
    pub status: String,
    pub topic_summary: Option<String>,
}

// ============================================================================
// PERSONALITY
// ============================================================================

/// Personality profile inferred by the backend for a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalityProfile {
    pub user_id: UserId,
    pub mbti_type: Option<String>,
    /// Trait name to score in `0.0..=1.0`.
    #[serde(default)]
    pub traits: BTreeMap<String, f64>,
    pub summary: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

// ============================================================================
// CHAT & HEALTH
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub user_id: UserId,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buddy_id: Option<BuddyId>,
}

impl ChatRequest {
    pub fn new(user_id: UserId, message: impl Into<String>) -> Self {
        Self {
            user_id,
            message: message.into(),
            session_id: None,
            buddy_id: None,
        }
    }

    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_buddy(mut self, buddy_id: BuddyId) -> Self {
        self.buddy_id = Some(buddy_id);
        self
    }

    /// Reject requests the backend would refuse anyway.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.user_id.is_blank() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "user_id".to_string(),
            });
        }
        if self.message.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "message".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub session_id: SessionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: Option<String>,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.status.eq_ignore_ascii_case("ok") || self.status.eq_ignore_ascii_case("healthy")
    }
}
