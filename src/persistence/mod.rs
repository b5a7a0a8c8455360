//! Persistence Module
//!
//! Snapshot export and import for warm restarts. Persistence is a cold
//! start optimization: snapshots may miss concurrent writes and a failed
//! write is not rolled back.

mod manager;
mod snapshot;

pub use manager::{PersistReport, PersistenceManager};
pub use snapshot::{encode_record, SnapshotReader};
