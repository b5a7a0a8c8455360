//! Cache Module
//!
//! Local entry storage with eviction, expiration and statistics.

mod entry;
mod eviction;
mod expiration;
mod stats;
mod store;


// Re-export public types
pub use entry::{CachedValue, NearCacheEntry, ENTRY_OVERHEAD_BYTES};
pub use eviction::{EvictionCandidate, EvictionPolicy};
pub use expiration::{ExpirationPolicy, NEVER_EXPIRES};
pub use stats::{NearCacheStats, PersistenceRecord, StatsRecorder};
pub use store::{EntryStore, PutOutcome, RemovalCause, SweepReport};
