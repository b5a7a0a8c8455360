//! Invalidation Tracker
//!
//! Per (partition, source) sequence bookkeeping. A sequence that skips
//! ahead means notifications were lost; since the lost keys are unknown,
//! the whole cache is cleared.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{EntryStore, RemovalCause, StatsRecorder};
use crate::invalidation::{InvalidationEvent, SequenceState};
use crate::PartitionId;

/// What applying one event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationOutcome {
    /// In-order (or first) sequence; `removed` tells whether the key was cached
    Applied { removed: bool },
    /// Duplicate or older sequence, nothing changed
    Ignored,
    /// Gap or whole-map event; every entry was dropped
    Cleared { entries: usize },
}

/// Result of comparing local sequences with the publisher's.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Pairs seen for the first time
    pub initialized: usize,
    /// Pairs whose local sequence was behind
    pub behind: usize,
    /// Entries dropped as a consequence
    pub cleared: usize,
}

/// Snapshot taken before a remote fetch, checked before its result is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    epoch: u64,
    tick: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct PartitionMarks {
    /// Entries written with a lower sequence are stale
    stale_watermark: u64,
    /// Invalidation tick of the latest key invalidated in this partition
    last_invalidated_tick: u64,
}

// == Invalidation Tracker ==
#[derive(Debug)]
pub struct InvalidationTracker {
    sequences: DashMap<(PartitionId, Uuid), u64>,
    partitions: DashMap<PartitionId, PartitionMarks>,
    /// Bumped by every full clear
    epoch: AtomicU64,
    /// Bumped by every applied single-key invalidation
    ticks: AtomicU64,
    stats: Arc<StatsRecorder>,
}

impl InvalidationTracker {
    pub fn new(stats: Arc<StatsRecorder>) -> Self {
        Self {
            sequences: DashMap::new(),
            partitions: DashMap::new(),
            epoch: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            stats,
        }
    }

    /// Establishes baselines from the publisher's current state.
    pub fn initialize(&self, state: &SequenceState) {
        for (&pair, &sequence) in state {
            self.sequences.insert(pair, sequence);
        }
        debug!(pairs = state.len(), "Invalidation sequences initialized");
    }

    /// Last recorded sequence of a pair; None while uninitialized.
    pub fn sequence(&self, partition_id: PartitionId, source: Uuid) -> Option<u64> {
        self.sequences.get(&(partition_id, source)).map(|s| *s)
    }

    pub fn stale_watermark(&self, partition_id: PartitionId) -> u64 {
        self.partitions
            .get(&partition_id)
            .map_or(0, |marks| marks.stale_watermark)
    }

    /// An entry written at `sequence` may have missed an invalidation.
    pub fn is_stale(&self, partition_id: PartitionId, sequence: u64) -> bool {
        sequence < self.stale_watermark(partition_id)
    }

    // == Reservations ==
    pub fn reserve(&self) -> Reservation {
        Reservation {
            epoch: self.epoch.load(Ordering::SeqCst),
            tick: self.ticks.load(Ordering::SeqCst),
        }
    }

    /// False when a clear, or an invalidation in `partition_id`, happened
    /// after the reservation was taken.
    pub fn is_valid(&self, reservation: &Reservation, partition_id: PartitionId) -> bool {
        if self.epoch.load(Ordering::SeqCst) != reservation.epoch {
            return false;
        }
        self.partitions
            .get(&partition_id)
            .map_or(true, |marks| marks.last_invalidated_tick <= reservation.tick)
    }

    // == Apply ==
    /// Applies one event. Events of a pair must arrive in publication order.
    pub fn apply<K, V>(&self, event: InvalidationEvent<K>, store: &EntryStore<K, V>) -> InvalidationOutcome
    where
        K: Eq + Hash + Clone,
    {
        match event {
            InvalidationEvent::SingleKey {
                partition_id,
                key,
                source,
                sequence,
            } => self.apply_single(partition_id, &key, source, sequence, store),
            InvalidationEvent::All { source, sequence } => {
                self.stats.record_invalidation_request();
                self.reset();
                let entries = self.clear(store);
                info!(%source, sequence, entries, "Whole-map invalidation cleared near cache");
                InvalidationOutcome::Cleared { entries }
            }
        }
    }

    fn apply_single<K, V>(
        &self,
        partition_id: PartitionId,
        key: &K,
        source: Uuid,
        sequence: u64,
        store: &EntryStore<K, V>,
    ) -> InvalidationOutcome
    where
        K: Eq + Hash + Clone,
    {
        let previous = self.sequence(partition_id, source);
        match previous {
            Some(last) if sequence <= last => {
                debug!(partition_id, %source, sequence, last, "Ignoring old invalidation");
                return InvalidationOutcome::Ignored;
            }
            Some(last) if sequence != last + 1 => {
                self.stats.record_invalidation_request();
                self.sequences.insert((partition_id, source), sequence);
                {
                    let mut marks = self.partitions.entry(partition_id).or_default();
                    marks.stale_watermark = marks.stale_watermark.max(sequence);
                }
                let entries = self.clear(store);
                warn!(
                    partition_id,
                    %source,
                    expected = last + 1,
                    received = sequence,
                    entries,
                    "Invalidation gap detected, near cache cleared"
                );
                return InvalidationOutcome::Cleared { entries };
            }
            _ => {}
        }

        self.stats.record_invalidation_request();
        self.sequences.insert((partition_id, source), sequence);
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        self.partitions.entry(partition_id).or_default().last_invalidated_tick = tick;
        let removed = store.remove(key, RemovalCause::Invalidated);
        InvalidationOutcome::Applied { removed }
    }

    // == Reconcile ==
    /// Compares local sequences with the publisher's; any pair behind
    /// clears the whole cache once.
    pub fn reconcile<K, V>(&self, state: &SequenceState, store: &EntryStore<K, V>) -> ReconcileReport
    where
        K: Eq + Hash + Clone,
    {
        let mut report = ReconcileReport::default();

        for (&(partition_id, source), &authoritative) in state {
            match self.sequence(partition_id, source) {
                None => {
                    self.sequences.insert((partition_id, source), authoritative);
                    report.initialized += 1;
                }
                Some(local) if local < authoritative => {
                    self.sequences.insert((partition_id, source), authoritative);
                    let mut marks = self.partitions.entry(partition_id).or_default();
                    marks.stale_watermark = marks.stale_watermark.max(authoritative);
                    report.behind += 1;
                }
                Some(_) => {}
            }
        }

        if report.behind > 0 {
            report.cleared = self.clear(store);
            warn!(
                behind = report.behind,
                cleared = report.cleared,
                "Reconciliation found missed invalidations, near cache cleared"
            );
        }
        report
    }

    // == Clear ==
    /// Drops every entry and voids outstanding reservations.
    ///
    /// Every dropped entry is counted once in `invalidations`; `evictions`
    /// and `misses` are left alone. Owned entry count and memory cost fall
    /// to zero. Gap, whole-map, reconciliation and operator clears all go
    /// through here.
    pub fn clear<K, V>(&self, store: &EntryStore<K, V>) -> usize
    where
        K: Eq + Hash + Clone,
    {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let entries = store.clear();
        self.stats.record_invalidations(entries as u64);
        entries
    }

    /// Forgets every tracked pair; they re-initialize on their next event.
    pub fn reset(&self) {
        self.sequences.clear();
        self.partitions.clear();
    }
}
