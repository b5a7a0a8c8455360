//! Near Cache - A client-side cache for a remote partitioned map
//!
//! Keeps a bounded local copy of recently used entries, kept coherent with
//! remote mutations through sequenced invalidation events, with pluggable
//! eviction, TTL/max-idle expiration and snapshot persistence.

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod invalidation;
pub mod models;
pub mod near_cache;
pub mod persistence;
pub mod serializer;
pub mod tasks;

/// Partition of the remote map owning a key.
pub type PartitionId = u32;

pub use api::AppState;
pub use config::{EvictionPolicyKind, InMemoryFormat, NearCacheConfig, PersistenceConfig};
pub use error::{NearCacheError, Result};
pub use near_cache::{DataAccessor, Fetched, NearCache};
