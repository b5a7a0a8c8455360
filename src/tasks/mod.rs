//! Background Tasks Module
//!
//! Tasks owned by a running near cache. Each one stops when its
//! cancellation token fires.
//!
//! # Tasks
//! - Sweep: removes expired entries and restores capacity bounds
//! - Invalidation listener: drains the invalidation queue
//! - Reconciliation: compares sequence state with the publisher

mod invalidation;
mod reconciliation;
mod sweep;

pub use invalidation::spawn_invalidation_listener;
pub use reconciliation::spawn_reconciliation_task;
pub use sweep::spawn_sweep_task;
