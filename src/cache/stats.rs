//! Near Cache Statistics Module
//!
//! Tracks cache performance and content metrics with atomic counters so
//! recording never serializes unrelated cache operations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

// == Stats Recorder ==
/// Live counters owned by one near cache instance.
#[derive(Debug)]
pub struct StatsRecorder {
    creation_time: DateTime<Utc>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    invalidation_requests: AtomicU64,
    invalidations: AtomicU64,
    stale_reads: AtomicU64,
    rejected_puts: AtomicU64,
    owned_entry_count: AtomicU64,
    owned_entry_memory_cost: AtomicU64,
    persistence_count: AtomicU64,
    restored_keys: AtomicU64,
    last_persistence: Mutex<PersistenceRecord>,
}

/// Outcome of the most recent persist.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PersistenceRecord {
    pub last_persistence_time: Option<DateTime<Utc>>,
    pub last_persistence_duration_ms: u64,
    pub last_persistence_written_bytes: u64,
    pub last_persistence_key_count: u64,
    pub last_persistence_failure: Option<String>,
}

impl Default for StatsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsRecorder {
    // == Constructor ==
    /// Creates a recorder with all counters at zero.
    pub fn new() -> Self {
        Self {
            creation_time: Utc::now(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            invalidation_requests: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            stale_reads: AtomicU64::new(0),
            rejected_puts: AtomicU64::new(0),
            owned_entry_count: AtomicU64::new(0),
            owned_entry_memory_cost: AtomicU64::new(0),
            persistence_count: AtomicU64::new(0),
            restored_keys: AtomicU64::new(0),
            last_persistence: Mutex::new(PersistenceRecord::default()),
        }
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_expirations(&self, count: u64) {
        self.expirations.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_invalidation_request(&self) {
        self.invalidation_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Entries actually dropped because of an invalidation.
    pub fn record_invalidations(&self, count: u64) {
        self.invalidations.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_stale_read(&self) {
        self.stale_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_put(&self) {
        self.rejected_puts.fetch_add(1, Ordering::Relaxed);
    }

    // == Owned Entry Accounting ==
    pub fn entry_added(&self, cost: u64) {
        self.owned_entry_count.fetch_add(1, Ordering::Relaxed);
        self.owned_entry_memory_cost.fetch_add(cost, Ordering::Relaxed);
    }

    pub fn entry_removed(&self, cost: u64) {
        self.owned_entry_count.fetch_sub(1, Ordering::Relaxed);
        self.owned_entry_memory_cost.fetch_sub(cost, Ordering::Relaxed);
    }

    pub fn entry_replaced(&self, old_cost: u64, new_cost: u64) {
        self.owned_entry_memory_cost.fetch_add(new_cost, Ordering::Relaxed);
        self.owned_entry_memory_cost.fetch_sub(old_cost, Ordering::Relaxed);
    }

    pub fn entries_cleared(&self, count: u64, cost: u64) {
        self.owned_entry_count.fetch_sub(count, Ordering::Relaxed);
        self.owned_entry_memory_cost.fetch_sub(cost, Ordering::Relaxed);
    }

    // == Persistence ==
    pub fn record_persistence(&self, key_count: u64, written_bytes: u64, duration: Duration) {
        self.persistence_count.fetch_add(1, Ordering::Relaxed);
        let mut record = self.last_persistence.lock();
        record.last_persistence_time = Some(Utc::now());
        record.last_persistence_duration_ms = duration.as_millis() as u64;
        record.last_persistence_written_bytes = written_bytes;
        record.last_persistence_key_count = key_count;
        record.last_persistence_failure = None;
    }

    pub fn record_persistence_failure(&self, message: impl Into<String>, duration: Duration) {
        let mut record = self.last_persistence.lock();
        record.last_persistence_time = Some(Utc::now());
        record.last_persistence_duration_ms = duration.as_millis() as u64;
        record.last_persistence_failure = Some(message.into());
    }

    pub fn record_restored_keys(&self, count: u64) {
        self.restored_keys.fetch_add(count, Ordering::Relaxed);
    }

    pub fn owned_entry_count(&self) -> u64 {
        self.owned_entry_count.load(Ordering::Relaxed)
    }

    // == Reset ==
    /// Operator reset of the activity counters.
    ///
    /// Owned entry accounting describes current content and is left alone.
    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.evictions,
            &self.expirations,
            &self.invalidation_requests,
            &self.invalidations,
            &self.stale_reads,
            &self.rejected_puts,
            &self.persistence_count,
            &self.restored_keys,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *self.last_persistence.lock() = PersistenceRecord::default();
    }

    // == Snapshot ==
    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> NearCacheStats {
        NearCacheStats {
            creation_time: self.creation_time,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            invalidation_requests: self.invalidation_requests.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            stale_reads: self.stale_reads.load(Ordering::Relaxed),
            rejected_puts: self.rejected_puts.load(Ordering::Relaxed),
            owned_entry_count: self.owned_entry_count.load(Ordering::Relaxed),
            owned_entry_memory_cost: self.owned_entry_memory_cost.load(Ordering::Relaxed),
            persistence_count: self.persistence_count.load(Ordering::Relaxed),
            restored_keys: self.restored_keys.load(Ordering::Relaxed),
            persistence: self.last_persistence.lock().clone(),
        }
    }
}

// == Near Cache Stats ==
/// Read-only view of the statistics handed out to callers.
#[derive(Debug, Clone, Serialize)]
pub struct NearCacheStats {
    pub creation_time: DateTime<Utc>,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub invalidation_requests: u64,
    pub invalidations: u64,
    pub stale_reads: u64,
    pub rejected_puts: u64,
    pub owned_entry_count: u64,
    pub owned_entry_memory_cost: u64,
    pub persistence_count: u64,
    pub restored_keys: u64,
    #[serde(flatten)]
    pub persistence: PersistenceRecord,
}

impl NearCacheStats {
    // == Hit Ratio ==
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new() {
        let stats = StatsRecorder::new().snapshot();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.evictions, 0);
        assert_eq!(stats.owned_entry_count, 0);
        assert!(stats.persistence.last_persistence_time.is_none());
    }

    #[test]
    fn test_hit_ratio_no_requests() {
        let stats = StatsRecorder::new().snapshot();
        assert_eq!(stats.hit_ratio(), 0.0);
    }

    #[test]
    fn test_hit_ratio_mixed() {
        let recorder = StatsRecorder::new();
        recorder.record_hit();
        recorder.record_hit();
        recorder.record_hit();
        recorder.record_miss();
        assert_eq!(recorder.snapshot().hit_ratio(), 0.75);
    }

    #[test]
    fn test_owned_accounting() {
        let recorder = StatsRecorder::new();
        recorder.entry_added(100);
        recorder.entry_added(50);
        recorder.entry_replaced(50, 80);
        recorder.entry_removed(100);

        let stats = recorder.snapshot();
        assert_eq!(stats.owned_entry_count, 1);
        assert_eq!(stats.owned_entry_memory_cost, 80);

        recorder.entries_cleared(1, 80);
        assert_eq!(recorder.owned_entry_count(), 0);
    }

    #[test]
    fn test_persistence_failure_then_success_clears_message() {
        let recorder = StatsRecorder::new();
        recorder.record_persistence_failure("disk full", Duration::from_millis(3));
        assert_eq!(
            recorder.snapshot().persistence.last_persistence_failure.as_deref(),
            Some("disk full")
        );

        recorder.record_persistence(10, 400, Duration::from_millis(7));
        let stats = recorder.snapshot();
        assert_eq!(stats.persistence_count, 1);
        assert_eq!(stats.persistence.last_persistence_key_count, 10);
        assert_eq!(stats.persistence.last_persistence_written_bytes, 400);
        assert!(stats.persistence.last_persistence_failure.is_none());
    }

    #[test]
    fn test_reset_keeps_owned_entries() {
        let recorder = StatsRecorder::new();
        recorder.entry_added(10);
        recorder.record_hit();
        recorder.record_evictions(2);

        recorder.reset();

        let stats = recorder.snapshot();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.evictions, 0);
        assert_eq!(stats.owned_entry_count, 1);
    }
}
