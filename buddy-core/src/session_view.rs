//! Presentation projection of sessions.
//!
//! `enhance_sessions_for_ui` decorates raw sessions with an icon, an accent
//! color and display labels. The projection is pure: [`UiSession::into_raw`]
//! returns the session exactly as it came from the backend.

use serde::Serialize;

use crate::entities::Session;

/// Topic keywords mapped to an icon name and accent color. First match wins.
const TOPIC_STYLES: &[(&[&str], &str, &str)] = &[
    (&["work", "job", "career", "meeting", "project"], "briefcase", "#4F7CAC"),
    (&["sleep", "tired", "rest", "dream"], "moon", "#6C5B7B"),
    (&["family", "mom", "dad", "sister", "brother", "kids"], "home", "#E8A87C"),
    (&["friend", "party", "social", "date"], "users", "#F67280"),
    (&["health", "gym", "workout", "run", "exercise"], "heart", "#C06C84"),
    (&["travel", "trip", "hiking", "vacation"], "map", "#41B3A3"),
    (&["study", "exam", "school", "learn", "book"], "book", "#85CDCA"),
    (&["music", "song", "movie", "game", "art"], "music", "#D5A021"),
    (&["stress", "anxious", "worried", "sad"], "cloud", "#8D8741"),
];

/// Fallback palette when no topic keyword matches; picked by session id.
const FALLBACK_COLORS: &[&str] = &["#5DA9E9", "#9B5DE5", "#F15BB5", "#00BBF9", "#00F5D4"];
const FALLBACK_ICON: &str = "message-circle";

/// A session decorated for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UiSession {
    #[serde(flatten)]
    session: Session,
    pub icon: String,
    pub color: String,
    pub display_title: String,
    pub duration_label: Option<String>,
}

impl UiSession {
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Drop the presentation fields.
    pub fn into_raw(self) -> Session {
        self.session
    }
}

/// Decorate sessions for display, preserving order.
pub fn enhance_sessions_for_ui(sessions: &[Session]) -> Vec<UiSession> {
    sessions.iter().cloned().map(enhance_session).collect()
}

pub fn enhance_session(session: Session) -> UiSession {
    let (icon, color) = style_for(&session);
    let display_title = match session.topic_summary.as_deref().map(str::trim) {
        Some(topic) if !topic.is_empty() => topic.to_string(),
        _ => format!("Chat on {}", session.created_at.format("%b %-d")),
    };
    let duration_label = session.duration_seconds.map(format_duration);
    UiSession {
        session,
        icon: icon.to_string(),
        color: color.to_string(),
        display_title,
        duration_label,
    }
}

fn style_for(session: &Session) -> (&'static str, &'static str) {
    if let Some(topic) = session.topic_summary.as_deref() {
        let topic = topic.to_lowercase();
        for &(keywords, icon, color) in TOPIC_STYLES {
            if keywords.iter().any(|kw| topic.contains(kw)) {
                return (icon, color);
            }
        }
    }
    let bucket = session
        .session_id
        .as_str()
        .bytes()
        .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
    (FALLBACK_ICON, FALLBACK_COLORS[bucket % FALLBACK_COLORS.len()])
}

fn format_duration(seconds: u64) -> String {
    match seconds {
        0..=59 => format!("{}s", seconds),
        60..=3599 => format!("{}m {}s", seconds / 60, seconds % 60),
        _ => format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60),
    }
}
