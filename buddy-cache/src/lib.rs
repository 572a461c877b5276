//! Buddy Cache - Remote-State Cache with Optimistic Mutation
//!
//! - [`QueryCache`]: process-wide store of the last known value per key, with
//!   staleness tracking and one shared fetch per key.
//! - [`MutationCoordinator`]: writes tentative values ahead of the remote
//!   call and rolls them back on failure.
//! - [`InvalidationPolicy`]: which keys go stale when a mutation settles.

pub mod config;
pub mod entry;
pub mod invalidation;
pub mod mutation;
pub mod store;

pub use config::CacheConfig;
pub use entry::{CacheEntry, CacheEvent, CacheStats, FetchStatus};
pub use invalidation::InvalidationPolicy;
pub use mutation::MutationCoordinator;
pub use store::{MutationContext, QueryCache, RollbackOutcome};
