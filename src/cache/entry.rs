//! Near Cache Entry Module
//!
//! One cached key's value plus the metadata eviction, expiration and
//! invalidation need.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::cache::expiration::ExpirationPolicy;
use crate::PartitionId;

/// Fixed bookkeeping cost charged to every entry.
pub const ENTRY_OVERHEAD_BYTES: u64 = 64;

// == Cached Value ==
/// A value in the cache's configured in-memory format.
#[derive(Debug)]
pub enum CachedValue<V> {
    Object(Arc<V>),
    Binary(Arc<[u8]>),
}

impl<V> Clone for CachedValue<V> {
    fn clone(&self) -> Self {
        match self {
            Self::Object(value) => Self::Object(Arc::clone(value)),
            Self::Binary(bytes) => Self::Binary(Arc::clone(bytes)),
        }
    }
}

impl<V> CachedValue<V> {
    /// Estimated heap footprint of the value.
    ///
    /// Objects are charged their inline size only; heap data they own is
    /// invisible here. Callers that know better pass a measured cost
    /// through [`NearCacheEntry::with_value_cost`].
    pub fn estimated_size(&self) -> u64 {
        match self {
            Self::Object(_) => std::mem::size_of::<V>() as u64,
            Self::Binary(bytes) => bytes.len() as u64,
        }
    }
}

// == Near Cache Entry ==
#[derive(Debug)]
pub struct NearCacheEntry<V> {
    value: CachedValue<V>,
    /// Encoded key, kept when the cache is configured to store it
    key_bytes: Option<Arc<[u8]>>,
    pub partition_id: PartitionId,
    /// Partition invalidation sequence known valid when this was written
    pub sequence: u64,
    pub creation_time: u64,
    /// Logical stamp taken at insertion
    pub insertion_order: u64,
    /// Estimated memory cost in bytes
    pub cost: u64,
    last_access_time: AtomicU64,
    /// Logical stamp of the latest access; orders LRU exactly even when
    /// clock readings tie
    last_access_order: AtomicU64,
    hits: AtomicU64,
    expiration_time: AtomicU64,
}

impl<V> NearCacheEntry<V> {
    // == Constructor ==
    pub fn new(
        value: CachedValue<V>,
        key_bytes: Option<Arc<[u8]>>,
        partition_id: PartitionId,
        sequence: u64,
        now: u64,
        insertion_order: u64,
        policy: &ExpirationPolicy,
    ) -> Self {
        let key_cost = key_bytes.as_ref().map_or(0, |bytes| bytes.len() as u64);
        let cost = ENTRY_OVERHEAD_BYTES + key_cost + value.estimated_size();

        Self {
            value,
            key_bytes,
            partition_id,
            sequence,
            creation_time: now,
            insertion_order,
            cost,
            last_access_time: AtomicU64::new(now),
            last_access_order: AtomicU64::new(insertion_order),
            hits: AtomicU64::new(0),
            expiration_time: AtomicU64::new(policy.expiration_time(now, now)),
        }
    }

    /// Charges the in-memory size of the key object.
    pub fn with_key_cost(mut self, bytes: u64) -> Self {
        self.cost += bytes;
        self
    }

    /// Replaces the estimated value size with a measured one.
    pub fn with_value_cost(mut self, bytes: u64) -> Self {
        self.cost = self.cost - self.value.estimated_size() + bytes;
        self
    }

    pub fn value(&self) -> &CachedValue<V> {
        &self.value
    }

    pub fn key_bytes(&self) -> Option<&Arc<[u8]>> {
        self.key_bytes.as_ref()
    }

    pub fn last_access_time(&self) -> u64 {
        self.last_access_time.load(Ordering::Relaxed)
    }

    pub fn last_access_order(&self) -> u64 {
        self.last_access_order.load(Ordering::Relaxed)
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn expiration_time(&self) -> u64 {
        self.expiration_time.load(Ordering::Relaxed)
    }

    // == Is Expired ==
    pub fn is_expired(&self, now: u64) -> bool {
        ExpirationPolicy::is_expired(self.expiration_time(), now)
    }

    // == Touch ==
    /// Records a hit at `now` and slides the max-idle deadline.
    pub fn touch(&self, now: u64, access_order: u64, policy: &ExpirationPolicy) {
        self.last_access_time.fetch_max(now, Ordering::Relaxed);
        self.last_access_order.fetch_max(access_order, Ordering::Relaxed);
        self.hits.fetch_add(1, Ordering::Relaxed);
        let expiration = policy.expiration_time(self.creation_time, self.last_access_time());
        self.expiration_time.store(expiration, Ordering::Relaxed);
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn entry(now: u64, policy: &ExpirationPolicy) -> NearCacheEntry<String> {
        NearCacheEntry::new(
            CachedValue::Object(Arc::new("value".to_string())),
            None,
            3,
            7,
            now,
            0,
            policy,
        )
    }

    #[test]
    fn test_measured_value_cost_replaces_estimate() {
        let policy = ExpirationPolicy::default();
        let estimated = entry(0, &policy);
        let measured = entry(0, &policy).with_value_cost(4_096);

        assert_eq!(
            measured.cost,
            estimated.cost - std::mem::size_of::<String>() as u64 + 4_096
        );
    }

    #[test]
    fn test_entry_without_expiration() {
        let policy = ExpirationPolicy::default();
        let entry = entry(0, &policy);

        assert_eq!(entry.partition_id, 3);
        assert_eq!(entry.sequence, 7);
        assert!(!entry.is_expired(u64::MAX - 1));
    }

    #[test]
    fn test_entry_ttl_expiration() {
        let policy = ExpirationPolicy::new(Some(100), None);
        let entry = entry(0, &policy);

        assert!(!entry.is_expired(100));
        assert!(entry.is_expired(150));
    }

    #[test]
    fn test_touch_extends_max_idle() {
        let policy = ExpirationPolicy::new(None, Some(50));
        let entry = entry(0, &policy);

        entry.touch(40, 1, &policy);
        assert_eq!(entry.hits(), 1);
        assert_eq!(entry.last_access_order(), 1);
        assert_eq!(entry.last_access_time(), 40);
        assert!(!entry.is_expired(80));
        assert!(entry.is_expired(91));
    }

    #[test]
    fn test_touch_never_moves_access_backwards() {
        let policy = ExpirationPolicy::default();
        let entry = entry(100, &policy);

        entry.touch(50, 1, &policy);
        assert_eq!(entry.last_access_time(), 100);
    }

    #[test]
    fn test_binary_cost_counts_bytes() {
        let policy = ExpirationPolicy::default();
        let bytes: Arc<[u8]> = Arc::from(vec![0u8; 100]);
        let key: Arc<[u8]> = Arc::from(vec![0u8; 10]);
        let entry: NearCacheEntry<String> =
            NearCacheEntry::new(CachedValue::Binary(bytes), Some(key), 0, 0, 0, 0, &policy);

        assert_eq!(entry.cost, ENTRY_OVERHEAD_BYTES + 110);
    }
}
