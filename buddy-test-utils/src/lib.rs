//! Buddy Test Utilities
//!
//! Centralized test infrastructure for the buddy workspace:
//! - Proptest generators for entities and query keys
//! - Fixtures for the common buddy/session scenarios
//! - `FakeBackend`, an in-memory [`BuddyBackend`] with scripted failures

pub use buddy_core::{
    ApiError, Buddy, BuddyBackend, BuddyId, BuddyPersonality, ChatRequest, ChatResponse,
    HealthStatus, PersonalityProfile, ProcessSessionRequest, ProcessSessionResponse, QueryKey,
    Session, SessionId, UserId, VoiceProfile,
};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use proptest::prelude::*;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

// ============================================================================
// FIXTURES
// ============================================================================

fn buddy(id: &str, name: &str, mbti: &str, accent: &str, gender: &str) -> Buddy {
    Buddy {
        id: BuddyId::from(id),
        name: name.to_string(),
        personality: BuddyPersonality {
            mbti_type: mbti.to_string(),
            traits: vec!["curious".to_string(), "warm".to_string()],
            description: format!("{} is a friendly companion", name),
        },
        voice: VoiceProfile {
            accent: accent.to_string(),
            gender: gender.to_string(),
            elevenlabs_voice_id: format!("voice-{}", id),
        },
        sample_responses: vec![format!("Hey, it's {}!", name)],
    }
}

pub fn luna() -> Buddy {
    buddy("luna", "Luna", "INFP", "british", "female")
}

pub fn oliver() -> Buddy {
    buddy("oliver", "Oliver", "ENTJ", "american", "male")
}

pub fn zara() -> Buddy {
    buddy("zara", "Zara", "ENFP", "australian", "female")
}

pub fn all_buddies() -> Vec<Buddy> {
    vec![luna(), oliver(), zara()]
}

/// Fixed reference instant so fixtures compare equal across runs.
pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

pub fn session(id: &str, topic: Option<&str>) -> Session {
    let created_at = fixed_time();
    Session {
        session_id: SessionId::from(id),
        topic_summary: topic.map(str::to_string),
        created_at,
        ended_at: Some(created_at + ChronoDuration::minutes(10)),
        duration_seconds: Some(600),
        message_count: 12,
    }
}

/// Sessions `s1`, `s2`, `s3` in that order.
pub fn three_sessions() -> Vec<Session> {
    vec![
        session("s1", Some("Work deadlines")),
        session("s2", Some("Weekend hiking trip")),
        session("s3", None),
    ]
}

pub fn personality(user_id: &str) -> PersonalityProfile {
    let mut traits = BTreeMap::new();
    traits.insert("openness".to_string(), 0.8);
    traits.insert("extraversion".to_string(), 0.35);
    PersonalityProfile {
        user_id: UserId::from(user_id),
        mbti_type: Some("INTP".to_string()),
        traits,
        summary: Some("Reflective and analytical".to_string()),
        updated_at: Some(fixed_time()),
    }
}

// ============================================================================
// GENERATORS
// ============================================================================

pub fn arb_identifier() -> impl Strategy<Value = String> {
    "[a-z0-9][a-z0-9_-]{0,15}"
}

pub fn arb_user_id() -> impl Strategy<Value = UserId> {
    arb_identifier().prop_map(UserId::new)
}

/// Arbitrary key segments, including separator and escape characters.
pub fn arb_query_key() -> impl Strategy<Value = QueryKey> {
    (
        "[a-z-]{1,12}",
        prop::collection::vec("[a-zA-Z0-9:\\\\ _-]{0,10}", 0..4),
    )
        .prop_map(|(scope, params)| QueryKey::new(scope, params))
}

pub fn arb_session() -> impl Strategy<Value = Session> {
    (
        arb_identifier(),
        prop::option::of("[a-zA-Z ]{0,40}"),
        0i64..1_000_000,
        prop::option::of(0u64..20_000),
        0u32..500,
    )
        .prop_map(|(id, topic, offset, duration, message_count)| {
            let created_at = fixed_time() + ChronoDuration::seconds(offset);
            Session {
                session_id: SessionId::new(id),
                topic_summary: topic,
                created_at,
                ended_at: duration.map(|d| created_at + ChronoDuration::seconds(d as i64)),
                duration_seconds: duration,
                message_count,
            }
        })
}

/// Sessions with unique ids, in arbitrary order.
pub fn arb_sessions(max: usize) -> impl Strategy<Value = Vec<Session>> {
    prop::collection::vec(arb_session(), 0..max).prop_map(|sessions| {
        let mut seen = std::collections::HashSet::new();
        sessions
            .into_iter()
            .filter(|s| seen.insert(s.session_id.clone()))
            .collect()
    })
}

pub fn arb_buddy() -> impl Strategy<Value = Buddy> {
    (arb_identifier(), "[A-Z][a-z]{2,8}").prop_map(|(id, name)| {
        buddy(&id, &name, "INFJ", "neutral", "nonbinary")
    })
}

// ============================================================================
// FAKE BACKEND
// ============================================================================

/// Backend method names used for call counting and scripted failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    Health,
    SendChat,
    Personality,
    ListSessions,
    DeleteSession,
    ProcessSession,
    ListBuddies,
    SelectedBuddy,
    SelectBuddy,
}

#[derive(Debug, Default)]
struct FakeState {
    buddies: Vec<Buddy>,
    selected: HashMap<UserId, BuddyId>,
    sessions: HashMap<UserId, Vec<Session>>,
    personalities: HashMap<UserId, PersonalityProfile>,
    failures: HashMap<Call, VecDeque<ApiError>>,
    calls: HashMap<Call, usize>,
    latency: Option<Duration>,
    next_session: u64,
}

/// In-memory backend with the same semantics as the REST API.
///
/// Failures are scripted per method with [`FakeBackend::fail_next`] and are
/// consumed in order. Every call is counted, including failed ones.
#[derive(Debug, Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend seeded with the three fixture buddies.
    pub fn with_fixtures() -> Self {
        let backend = Self::new();
        backend.state().buddies = all_buddies();
        backend
    }

    pub fn with_sessions(self, user_id: &UserId, sessions: Vec<Session>) -> Self {
        self.state().sessions.insert(user_id.clone(), sessions);
        self
    }

    pub fn with_selected(self, user_id: &UserId, buddy_id: &BuddyId) -> Self {
        self.state()
            .selected
            .insert(user_id.clone(), buddy_id.clone());
        self
    }

    pub fn with_personality(self, profile: PersonalityProfile) -> Self {
        self.state()
            .personalities
            .insert(profile.user_id.clone(), profile);
        self
    }

    /// Delay every call, so concurrent callers overlap.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state().latency = Some(latency);
        self
    }

    pub fn fail_next(&self, call: Call, error: ApiError) {
        self.state()
            .failures
            .entry(call)
            .or_default()
            .push_back(error);
    }

    pub fn calls(&self, call: Call) -> usize {
        self.state().calls.get(&call).copied().unwrap_or(0)
    }

    pub fn sessions_of(&self, user_id: &UserId) -> Vec<Session> {
        self.state()
            .sessions
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn selected_of(&self, user_id: &UserId) -> Option<BuddyId> {
        self.state().selected.get(user_id).cloned()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Count the call, wait out the latency, then pop a scripted failure.
    async fn enter(&self, call: Call) -> Result<(), ApiError> {
        let latency = {
            let mut state = self.state();
            *state.calls.entry(call).or_default() += 1;
            state.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match self
            .state()
            .failures
            .get_mut(&call)
            .and_then(VecDeque::pop_front)
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BuddyBackend for FakeBackend {
    async fn health(&self) -> Result<HealthStatus, ApiError> {
        self.enter(Call::Health).await?;
        Ok(HealthStatus {
            status: "ok".to_string(),
            version: Some("fake".to_string()),
        })
    }

    async fn send_chat(&self, request: &ChatRequest) -> Result<ChatResponse, ApiError> {
        self.enter(Call::SendChat).await?;
        let mut state = self.state();
        let session_id = match &request.session_id {
            Some(id) => id.clone(),
            None => {
                state.next_session += 1;
                SessionId::new(format!("fake-session-{}", state.next_session))
            }
        };
        Ok(ChatResponse {
            response: format!("echo: {}", request.message),
            session_id,
        })
    }

    async fn personality(&self, user_id: &UserId) -> Result<Option<PersonalityProfile>, ApiError> {
        self.enter(Call::Personality).await?;
        Ok(self.state().personalities.get(user_id).cloned())
    }

    async fn list_sessions(&self, user_id: &UserId) -> Result<Vec<Session>, ApiError> {
        self.enter(Call::ListSessions).await?;
        Ok(self.sessions_of(user_id))
    }

    async fn delete_session(&self, session_id: &SessionId) -> Result<(), ApiError> {
        self.enter(Call::DeleteSession).await?;
        let mut state = self.state();
        let mut found = false;
        for sessions in state.sessions.values_mut() {
            let before = sessions.len();
            sessions.retain(|s| &s.session_id != session_id);
            found |= sessions.len() != before;
        }
        if found {
            Ok(())
        } else {
            Err(ApiError::not_found(format!("/sessions/{}", session_id)))
        }
    }

    async fn process_session(
        &self,
        request: &ProcessSessionRequest,
    ) -> Result<ProcessSessionResponse, ApiError> {
        self.enter(Call::ProcessSession).await?;
        Ok(ProcessSessionResponse {
            session_id: request.session_id.clone(),
            status: "processed".to_string(),
            topic_summary: Some("Processed conversation".to_string()),
        })
    }

    async fn list_buddies(&self) -> Result<Vec<Buddy>, ApiError> {
        self.enter(Call::ListBuddies).await?;
        Ok(self.state().buddies.clone())
    }

    async fn selected_buddy(&self, user_id: &UserId) -> Result<Option<Buddy>, ApiError> {
        self.enter(Call::SelectedBuddy).await?;
        let state = self.state();
        Ok(state
            .selected
            .get(user_id)
            .and_then(|id| state.buddies.iter().find(|b| &b.id == id))
            .cloned())
    }

    async fn select_buddy(&self, user_id: &UserId, buddy_id: &BuddyId) -> Result<(), ApiError> {
        self.enter(Call::SelectBuddy).await?;
        let mut state = self.state();
        if !state.buddies.iter().any(|b| &b.id == buddy_id) {
            return Err(ApiError::not_found(format!("/buddies/{}", buddy_id)));
        }
        state.selected.insert(user_id.clone(), buddy_id.clone());
        Ok(())
    }
}
