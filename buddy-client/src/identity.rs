//! Signed-in user and access token.
//!
//! Sign-in itself happens elsewhere. The client only needs to know who the
//! current user is and which bearer token to send.

use std::fmt;
use std::sync::{PoisonError, RwLock};

use buddy_core::UserId;

#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    access_token: Option<String>,
}

impl Identity {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            access_token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("user_id", &self.user_id)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Source of the current identity. `None` means signed out.
pub trait IdentityProvider: Send + Sync {
    fn current(&self) -> Option<Identity>;
}

/// Identity held in memory and replaced explicitly on sign-in or sign-out.
#[derive(Debug, Default)]
pub struct StaticIdentity {
    identity: RwLock<Option<Identity>>,
}

impl StaticIdentity {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity: RwLock::new(Some(identity)),
        }
    }

    pub fn signed_out() -> Self {
        Self::default()
    }

    /// Replace the identity, returning the previous one.
    pub fn set(&self, identity: Option<Identity>) -> Option<Identity> {
        let mut slot = self
            .identity
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, identity)
    }
}

impl IdentityProvider for StaticIdentity {
    fn current(&self) -> Option<Identity> {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
