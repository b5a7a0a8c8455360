//! Invalidation Module
//!
//! Applies remote change notifications to the local store and detects
//! missed notifications through per-partition sequence numbers.

mod event;
mod source;
mod tracker;

pub use event::InvalidationEvent;
pub use source::{InvalidationEventSource, SequenceState};
pub use tracker::{InvalidationOutcome, InvalidationTracker, ReconcileReport, Reservation};
