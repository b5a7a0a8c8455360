//! Invalidation events as delivered by the remote side.

use uuid::Uuid;

use crate::PartitionId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationEvent<K> {
    /// One key of `partition_id` changed remotely
    SingleKey {
        partition_id: PartitionId,
        key: K,
        source: Uuid,
        sequence: u64,
    },
    /// The whole map changed (cleared, reloaded, destroyed)
    All { source: Uuid, sequence: u64 },
}

impl<K> InvalidationEvent<K> {
    pub fn single(partition_id: PartitionId, key: K, source: Uuid, sequence: u64) -> Self {
        Self::SingleKey {
            partition_id,
            key,
            source,
            sequence,
        }
    }

    pub fn all(source: Uuid, sequence: u64) -> Self {
        Self::All { source, sequence }
    }

    pub fn source(&self) -> Uuid {
        match self {
            Self::SingleKey { source, .. } | Self::All { source, .. } => *source,
        }
    }
}
