//! Authoritative sequence state of the invalidation publisher.

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::PartitionId;

/// Latest published sequence per (partition, source).
pub type SequenceState = HashMap<(PartitionId, Uuid), u64>;

/// Remote side publishing invalidations.
///
/// Events themselves are pushed into the near cache's bounded queue; this
/// trait only answers "where are the sequences now", used at start-up and
/// for reconciliation.
#[async_trait]
pub trait InvalidationEventSource: Send + Sync {
    async fn current_sequence_state(&self) -> anyhow::Result<SequenceState>;
}
