//! Buddy Client - REST Backend, Configuration and Service Facade
//!
//! [`RestClient`] speaks HTTP to the buddy backend. [`BuddyService`] puts
//! the query cache in front of any [`BuddyBackend`](buddy_core::BuddyBackend)
//! and runs writes as optimistic mutations.

pub mod config;
pub mod error;
pub mod identity;
pub mod rest;
pub mod service;
pub mod telemetry;

pub use config::{AuthConfig, CacheSettings, ClientConfig};
pub use error::ClientError;
pub use identity::{Identity, IdentityProvider, StaticIdentity};
pub use rest::RestClient;
pub use service::BuddyService;
pub use telemetry::{LogConfig, LogFormat};
