//! Structural query keys for cached remote resources.
//!
//! A [`QueryKey`] is an ordered tuple of string segments. The first segment is
//! the resource scope (`"sessions"`, `"selected-buddy"`, ...) and the rest are
//! parameters. Equality, ordering and hashing are structural.
//!
//! Keys for a logical resource are only built through the constructors in
//! [`keys`], so every call site produces the same key and the same
//! serialized form.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;

use crate::entities::{Buddy, HealthStatus, PersonalityProfile, Session, SessionId, UserId};

/// Separator used by the canonical string form.
const SEPARATOR: char = ':';
const ESCAPE: char = '\\';

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey {
    segments: Vec<String>,
}

impl QueryKey {
    /// Create a key from a scope and its parameters.
    pub fn new<I, S>(scope: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut segments = vec![scope.into()];
        segments.extend(params.into_iter().map(Into::into));
        Self { segments }
    }

    /// Key with no parameters.
    pub fn scoped(scope: impl Into<String>) -> Self {
        Self {
            segments: vec![scope.into()],
        }
    }

    pub fn scope(&self) -> &str {
        self.segments.first().map(String::as_str).unwrap_or_default()
    }

    pub fn params(&self) -> &[String] {
        self.segments.get(1..).unwrap_or_default()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Same parameters under a different scope.
    ///
    /// Used by invalidation rules: `selected-buddy:u1` -> `sessions:u1`.
    pub fn rescoped(&self, scope: impl Into<String>) -> Self {
        Self::new(scope, self.params().iter().cloned())
    }

    /// Whether this key begins with every segment of `prefix`.
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// Canonical, unambiguous string form.
    ///
    /// Separators and escape characters inside segments are escaped, so two
    /// distinct keys never encode to the same string.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                out.push(SEPARATOR);
            }
            for ch in segment.chars() {
                if ch == SEPARATOR || ch == ESCAPE {
                    out.push(ESCAPE);
                }
                out.push(ch);
            }
        }
        out
    }

    /// Parse the canonical string form produced by [`QueryKey::encode`].
    ///
    /// Returns `None` for a dangling escape character.
    pub fn decode(encoded: &str) -> Option<Self> {
        let mut segments = Vec::new();
        let mut current = String::new();
        let mut chars = encoded.chars();
        while let Some(ch) = chars.next() {
            match ch {
                ESCAPE => current.push(chars.next()?),
                SEPARATOR => segments.push(std::mem::take(&mut current)),
                other => current.push(other),
            }
        }
        segments.push(current);
        Some(Self { segments })
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// A [`QueryKey`] bound to the type of value cached under it.
///
/// The cache stores values type-erased; reading through a `TypedKey` is what
/// keeps a `sessions` key from being read back as a `Buddy`.
pub struct TypedKey<T> {
    key: QueryKey,
    _value: PhantomData<fn() -> T>,
}

impl<T> TypedKey<T> {
    pub fn new(key: QueryKey) -> Self {
        Self {
            key,
            _value: PhantomData,
        }
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn into_key(self) -> QueryKey {
        self.key
    }
}

impl<T> Clone for TypedKey<T> {
    fn clone(&self) -> Self {
        Self::new(self.key.clone())
    }
}

impl<T> fmt::Debug for TypedKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypedKey").field(&self.key).finish()
    }
}

impl<T> PartialEq for TypedKey<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<T> Eq for TypedKey<T> {}

impl<T> AsRef<QueryKey> for TypedKey<T> {
    fn as_ref(&self) -> &QueryKey {
        &self.key
    }
}

impl<T> fmt::Display for TypedKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.key, f)
    }
}

/// Canonical key constructors.
pub mod keys {
    use super::*;

    pub const BUDDIES: &str = "buddies";
    pub const SELECTED_BUDDY: &str = "selected-buddy";
    pub const SESSIONS: &str = "sessions";
    pub const SESSION: &str = "session";
    pub const PERSONALITY: &str = "personality";
    pub const HEALTH: &str = "health";

    pub fn buddies() -> TypedKey<Vec<Buddy>> {
        TypedKey::new(QueryKey::scoped(BUDDIES))
    }

    pub fn selected_buddy(user_id: &UserId) -> TypedKey<Option<Buddy>> {
        TypedKey::new(QueryKey::new(SELECTED_BUDDY, [user_id.as_str()]))
    }

    pub fn sessions(user_id: &UserId) -> TypedKey<Vec<Session>> {
        TypedKey::new(QueryKey::new(SESSIONS, [user_id.as_str()]))
    }

    pub fn session(session_id: &SessionId) -> TypedKey<Session> {
        TypedKey::new(QueryKey::new(SESSION, [session_id.as_str()]))
    }

    pub fn personality(user_id: &UserId) -> TypedKey<Option<PersonalityProfile>> {
        TypedKey::new(QueryKey::new(PERSONALITY, [user_id.as_str()]))
    }

    pub fn health() -> TypedKey<HealthStatus> {
        TypedKey::new(QueryKey::scoped(HEALTH))
    }
}
