//! Entry Store Module
//!
//! Concurrent key to entry table with bounded size, combining sharded
//! storage with eviction and expiration.
//!
//! Per-key operations go through `DashMap` shards and hold the structure
//! gate shared. Clear and eviction batches hold it exclusively for the
//! duration of the structural change only.

use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::cache::{
    CachedValue, EvictionCandidate, EvictionPolicy, ExpirationPolicy, NearCacheEntry,
    StatsRecorder,
};
use crate::clock::SharedClock;
use crate::config::NearCacheConfig;
use crate::PartitionId;

/// Why an entry left the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
    /// Explicit remove by the caller
    Removed,
    Evicted,
    Expired,
    /// Remote change notification
    Invalidated,
    /// Found behind its partition's stale watermark
    Stale,
    /// Admission withdrawn after an invalidation raced the write
    Rejected,
}

/// Result of a put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    Replaced,
    /// Not cached; the cache is full and does not evict
    Rejected,
}

/// Entries reclaimed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub evicted: usize,
}

// == Entry Store ==
pub struct EntryStore<K, V> {
    entries: DashMap<K, Arc<NearCacheEntry<V>>>,
    /// Shared for per-key work, exclusive for clear and eviction
    structure: RwLock<()>,
    eviction: EvictionPolicy,
    expiration: ExpirationPolicy,
    stats: Arc<StatsRecorder>,
    clock: SharedClock,
    max_size: usize,
    max_memory_cost: Option<u64>,
    eviction_batch_percentage: usize,
    count: AtomicUsize,
    memory_cost: AtomicU64,
    /// Logical clock for insertion and access ordering
    ticks: AtomicU64,
    sweeping: AtomicBool,
}

impl<K, V> std::fmt::Debug for EntryStore<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryStore")
            .field("len", &self.count.load(Ordering::Relaxed))
            .field("max_size", &self.max_size)
            .field("eviction", &self.eviction)
            .finish()
    }
}

impl<K, V> EntryStore<K, V>
where
    K: Eq + Hash + Clone,
{
    // == Constructor ==
    pub fn new(config: &NearCacheConfig, stats: Arc<StatsRecorder>, clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            structure: RwLock::new(()),
            eviction: EvictionPolicy::from_config(config),
            expiration: ExpirationPolicy::from_config(config),
            stats,
            clock,
            max_size: config.max_size,
            max_memory_cost: config.max_memory_cost,
            eviction_batch_percentage: config.eviction_batch_percentage as usize,
            count: AtomicUsize::new(0),
            memory_cost: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            sweeping: AtomicBool::new(false),
        }
    }

    // == Get ==
    /// Looks up a servable entry.
    ///
    /// Expired entries and entries `is_stale` rejects are removed and
    /// reported as misses. A hit touches the entry.
    pub fn get_with<F>(&self, key: &K, is_stale: F) -> Option<CachedValue<V>>
    where
        F: FnOnce(&NearCacheEntry<V>) -> bool,
    {
        let _gate = self.structure.read();

        let entry = match self.entries.get(key) {
            Some(found) => Arc::clone(found.value()),
            None => {
                self.stats.record_miss();
                return None;
            }
        };

        let now = self.clock.now_ms();
        if entry.is_expired(now) {
            self.remove_if_same(key, &entry, RemovalCause::Expired);
            self.stats.record_miss();
            return None;
        }
        if is_stale(&entry) {
            self.remove_if_same(key, &entry, RemovalCause::Stale);
            self.stats.record_miss();
            return None;
        }

        entry.touch(now, self.next_tick(), &self.expiration);
        self.stats.record_hit();
        Some(entry.value().clone())
    }

    pub fn get(&self, key: &K) -> Option<CachedValue<V>> {
        self.get_with(key, |_| false)
    }

    // == Put ==
    /// Inserts or overwrites an entry.
    ///
    /// A new key arriving at a full cache first evicts a batch (or, without
    /// an eviction policy, is rejected). Concurrent puts may overshoot the
    /// maximum by the number of racing inserts; the next sweep trims it.
    pub fn put(
        &self,
        key: K,
        value: CachedValue<V>,
        key_bytes: Option<Arc<[u8]>>,
        partition_id: PartitionId,
        sequence: u64,
    ) -> PutOutcome {
        self.put_measured(key, value, key_bytes, partition_id, sequence, None)
    }

    /// Like [`EntryStore::put`], charging `value_cost` bytes for the value
    /// instead of its estimated size when given.
    ///
    /// An entry costing more than the whole memory bound is never cached;
    /// an older value under the same key is dropped with it.
    pub fn put_measured(
        &self,
        key: K,
        value: CachedValue<V>,
        key_bytes: Option<Arc<[u8]>>,
        partition_id: PartitionId,
        sequence: u64,
        value_cost: Option<u64>,
    ) -> PutOutcome {
        let now = self.clock.now_ms();
        let insertion_order = self.next_tick();
        let mut entry = NearCacheEntry::new(
            value,
            key_bytes,
            partition_id,
            sequence,
            now,
            insertion_order,
            &self.expiration,
        )
        .with_key_cost(std::mem::size_of::<K>() as u64);
        if let Some(bytes) = value_cost {
            entry = entry.with_value_cost(bytes);
        }
        let cost = entry.cost;

        if let Some(max_cost) = self.max_memory_cost.filter(|&max_cost| cost > max_cost) {
            self.remove(&key, RemovalCause::Removed);
            self.stats.record_rejected_put();
            debug!(cost, max_cost, "Entry larger than the memory bound, not cached");
            return PutOutcome::Rejected;
        }

        if !self.entries.contains_key(&key) && self.is_over_capacity(1, cost) {
            if !self.eviction.evicts() {
                self.stats.record_rejected_put();
                return PutOutcome::Rejected;
            }
            self.evict_for(1, cost);
        }

        let _gate = self.structure.read();
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                let old = occupied.insert(Arc::new(entry));
                self.memory_cost.fetch_add(cost, Ordering::Relaxed);
                self.memory_cost.fetch_sub(old.cost, Ordering::Relaxed);
                self.stats.entry_replaced(old.cost, cost);
                PutOutcome::Replaced
            }
            Entry::Vacant(vacant) => {
                if self.eviction.evicts() {
                    self.count.fetch_add(1, Ordering::AcqRel);
                    self.memory_cost.fetch_add(cost, Ordering::AcqRel);
                } else if !self.try_reserve(cost) {
                    self.stats.record_rejected_put();
                    return PutOutcome::Rejected;
                }
                vacant.insert(Arc::new(entry));
                self.stats.entry_added(cost);
                PutOutcome::Inserted
            }
        }
    }

    // == Remove ==
    /// Removes a key. Returns true when an entry was present.
    pub fn remove(&self, key: &K, cause: RemovalCause) -> bool {
        let _gate = self.structure.read();
        self.remove_locked(key, cause)
    }

    // == Clear ==
    /// Drops every entry. Statistics counters other than owned-entry
    /// accounting are untouched. Returns the number of entries dropped.
    pub fn clear(&self) -> usize {
        let _gate = self.structure.write();
        let count = self.count.swap(0, Ordering::Relaxed);
        let cost = self.memory_cost.swap(0, Ordering::Relaxed);
        self.entries.clear();
        self.stats.entries_cleared(count as u64, cost);
        count
    }

    // == Sweep ==
    /// Removes expired entries, then evicts down to capacity.
    ///
    /// Returns None without doing anything when another sweep is running.
    pub fn sweep(&self) -> Option<SweepReport> {
        if self
            .sweeping
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        let report = self.sweep_inner();
        self.sweeping.store(false, Ordering::Release);
        Some(report)
    }

    fn sweep_inner(&self) -> SweepReport {
        let now = self.clock.now_ms();
        let mut report = SweepReport::default();

        let expired: Vec<(K, Arc<NearCacheEntry<V>>)> = self
            .entries
            .iter()
            .filter(|e| e.value().is_expired(now))
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        {
            let _gate = self.structure.read();
            for (key, entry) in &expired {
                if self.remove_if_same(key, entry, RemovalCause::Expired) {
                    report.expired += 1;
                }
            }
        }

        if self.eviction.evicts() && self.is_over_capacity(0, 0) {
            report.evicted = self.evict_for(0, 0);
        }

        if report.expired > 0 || report.evicted > 0 {
            debug!(
                expired = report.expired,
                evicted = report.evicted,
                size = self.len(),
                "Near cache sweep reclaimed entries"
            );
        }
        report
    }

    /// Clones out live entries for a bulk read, up to `limit`.
    ///
    /// Shards are visited one at a time, so concurrent writes may or may
    /// not be reflected.
    pub fn snapshot(&self, limit: Option<usize>) -> Vec<(K, Arc<NearCacheEntry<V>>)> {
        let now = self.clock.now_ms();
        self.entries
            .iter()
            .filter(|e| !e.value().is_expired(now))
            .take(limit.unwrap_or(usize::MAX))
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect()
    }

    // == Length ==
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn memory_cost(&self) -> u64 {
        self.memory_cost.load(Ordering::Relaxed)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> Vec<K> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    // == Internals ==

    fn next_tick(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::Relaxed)
    }

    fn is_over_capacity(&self, incoming: usize, incoming_cost: u64) -> bool {
        if self.len() + incoming > self.max_size {
            return true;
        }
        match self.max_memory_cost {
            Some(max_cost) => self.memory_cost() + incoming_cost > max_cost,
            None => false,
        }
    }

    /// Claims room for one entry, failing once the cache is full.
    fn try_reserve(&self, cost: u64) -> bool {
        let max_size = self.max_size;
        if self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max_size).then_some(n + 1))
            .is_err()
        {
            return false;
        }

        let reserved_cost = match self.max_memory_cost {
            Some(max_cost) => self
                .memory_cost
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                    (c + cost <= max_cost).then_some(c + cost)
                })
                .is_ok(),
            None => {
                self.memory_cost.fetch_add(cost, Ordering::Relaxed);
                true
            }
        };
        if !reserved_cost {
            self.count.fetch_sub(1, Ordering::AcqRel);
        }
        reserved_cost
    }

    /// Evicts batches until `incoming` more entries of `incoming_cost`
    /// fit. Returns the number of entries evicted.
    fn evict_for(&self, incoming: usize, incoming_cost: u64) -> usize {
        let _gate = self.structure.write();
        let mut evicted = 0;

        while self.is_over_capacity(incoming, incoming_cost) {
            let len = self.len();
            let needed = (len + incoming).saturating_sub(self.max_size);
            let floor = (len * self.eviction_batch_percentage / 100).max(1);
            let batch = needed.max(floor);
            let victims = self.eviction.select_victims(self.candidates(), batch);
            if victims.is_empty() {
                break;
            }
            for key in victims {
                if self.remove_locked(&key, RemovalCause::Evicted) {
                    evicted += 1;
                }
            }
        }

        if evicted > 0 {
            debug!(evicted, size = self.len(), "Near cache evicted batch");
        }
        evicted
    }

    fn candidates(&self) -> Vec<EvictionCandidate<K>> {
        self.entries
            .iter()
            .map(|e| EvictionCandidate {
                key: e.key().clone(),
                last_access: e.value().last_access_order(),
                hits: e.value().hits(),
                insertion_order: e.value().insertion_order,
            })
            .collect()
    }

    /// Caller holds the structure gate in either mode.
    fn remove_locked(&self, key: &K, cause: RemovalCause) -> bool {
        match self.entries.remove(key) {
            Some((_, entry)) => {
                self.release(&entry, cause);
                true
            }
            None => false,
        }
    }

    /// Removes `key` only if it still maps to `entry`, so a concurrent
    /// overwrite is never dropped by a decision about the old value.
    fn remove_if_same(&self, key: &K, entry: &Arc<NearCacheEntry<V>>, cause: RemovalCause) -> bool {
        match self.entries.remove_if(key, |_, current| Arc::ptr_eq(current, entry)) {
            Some((_, removed)) => {
                self.release(&removed, cause);
                true
            }
            None => false,
        }
    }

    fn release(&self, entry: &NearCacheEntry<V>, cause: RemovalCause) {
        self.count.fetch_sub(1, Ordering::AcqRel);
        self.memory_cost.fetch_sub(entry.cost, Ordering::AcqRel);
        self.stats.entry_removed(entry.cost);
        match cause {
            RemovalCause::Removed => {}
            RemovalCause::Evicted => self.stats.record_evictions(1),
            RemovalCause::Expired => self.stats.record_expirations(1),
            RemovalCause::Invalidated => self.stats.record_invalidations(1),
            RemovalCause::Stale => self.stats.record_stale_read(),
            RemovalCause::Rejected => self.stats.record_rejected_put(),
        }
    }
}
