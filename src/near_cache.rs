//! Near Cache Module
//!
//! Public surface tying the entry store, invalidation tracker, persistence
//! and background tasks together.

use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CachedValue, EntryStore, NearCacheStats, PutOutcome, RemovalCause, StatsRecorder, SweepReport};
use crate::clock::{SharedClock, SystemClock};
use crate::config::{InMemoryFormat, NearCacheConfig};
use crate::error::{NearCacheError, Result};
use crate::invalidation::{
    InvalidationEvent, InvalidationEventSource, InvalidationOutcome, InvalidationTracker,
    ReconcileReport,
};
use crate::persistence::{PersistReport, PersistenceManager};
use crate::serializer::Serializer;
use crate::tasks::{spawn_invalidation_listener, spawn_reconciliation_task, spawn_sweep_task};
use crate::PartitionId;

/// A value loaded from the remote map, with the invalidation sequence of
/// its partition at read time.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<V> {
    pub value: V,
    pub partition_id: PartitionId,
    pub sequence: u64,
}

/// Loads values from the remote map on a miss.
#[async_trait]
pub trait DataAccessor<K, V>: Send + Sync {
    async fn fetch(&self, key: &K) -> anyhow::Result<Fetched<V>>;

    /// Partition owning `key`.
    fn partition_id(&self, key: &K) -> PartitionId;
}

// == Near Cache ==
pub struct NearCache<K, V> {
    config: NearCacheConfig,
    store: Arc<EntryStore<K, V>>,
    tracker: Arc<InvalidationTracker>,
    stats: Arc<StatsRecorder>,
    accessor: Arc<dyn DataAccessor<K, V>>,
    key_serializer: Arc<dyn Serializer<K>>,
    value_serializer: Arc<dyn Serializer<V>>,
    invalidation_source: Option<Arc<dyn InvalidationEventSource>>,
    persistence: PersistenceManager,
    invalidation_tx: mpsc::Sender<InvalidationEvent<K>>,
    invalidation_rx: Mutex<Option<mpsc::Receiver<InvalidationEvent<K>>>>,
    reconcile_now: Arc<Notify>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl<K, V> NearCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    // == Constructor ==
    /// Builds a cache. Fails fast on an invalid configuration.
    ///
    /// Background work does not run until [`NearCache::start`].
    pub fn new(
        config: NearCacheConfig,
        accessor: Arc<dyn DataAccessor<K, V>>,
        key_serializer: Arc<dyn Serializer<K>>,
        value_serializer: Arc<dyn Serializer<V>>,
    ) -> Result<Self> {
        Self::with_clock(config, accessor, key_serializer, value_serializer, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(
        config: NearCacheConfig,
        accessor: Arc<dyn DataAccessor<K, V>>,
        key_serializer: Arc<dyn Serializer<K>>,
        value_serializer: Arc<dyn Serializer<V>>,
        clock: SharedClock,
    ) -> Result<Self> {
        config.validate()?;

        let stats = Arc::new(StatsRecorder::new());
        let store = Arc::new(EntryStore::new(&config, Arc::clone(&stats), clock));
        let tracker = Arc::new(InvalidationTracker::new(Arc::clone(&stats)));
        let persistence = PersistenceManager::new(config.persistence.clone(), Arc::clone(&stats));
        let (invalidation_tx, invalidation_rx) = mpsc::channel(config.invalidation_queue_capacity);

        info!(
            name = %config.name,
            max_size = config.max_size,
            eviction = ?config.eviction_policy,
            format = ?config.in_memory_format,
            "Near cache created"
        );

        Ok(Self {
            config,
            store,
            tracker,
            stats,
            accessor,
            key_serializer,
            value_serializer,
            invalidation_source: None,
            persistence,
            invalidation_tx,
            invalidation_rx: Mutex::new(Some(invalidation_rx)),
            reconcile_now: Arc::new(Notify::new()),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Attaches the publisher consulted for sequence state.
    pub fn with_invalidation_source(mut self, source: Arc<dyn InvalidationEventSource>) -> Self {
        self.invalidation_source = Some(source);
        self
    }

    // == Start ==
    /// Initializes sequence tracking and spawns the background tasks:
    /// expiration sweep, invalidation listener and reconciliation.
    pub async fn start(&self) -> Result<()> {
        self.ensure_open()?;

        if self.config.invalidate_on_change {
            if let Some(source) = &self.invalidation_source {
                match source.current_sequence_state().await {
                    Ok(state) => self.tracker.initialize(&state),
                    Err(e) => warn!(error = %e, "Could not read initial invalidation sequences"),
                }
            }
        }

        let mut tasks = self.tasks.lock();
        tasks.push(spawn_sweep_task(
            Arc::clone(&self.store),
            self.config.expiration_sweep_interval,
            self.shutdown.child_token(),
        ));

        if self.config.invalidate_on_change {
            if let Some(rx) = self.invalidation_rx.lock().take() {
                tasks.push(spawn_invalidation_listener(
                    Arc::clone(&self.tracker),
                    Arc::clone(&self.store),
                    rx,
                    self.shutdown.child_token(),
                ));
            }
            if let Some(source) = &self.invalidation_source {
                tasks.push(spawn_reconciliation_task(
                    Arc::clone(&self.tracker),
                    Arc::clone(&self.store),
                    Arc::clone(source),
                    self.config.reconciliation_interval,
                    Arc::clone(&self.reconcile_now),
                    self.shutdown.child_token(),
                ));
            }
        }

        info!(name = %self.config.name, tasks = tasks.len(), "Near cache started");
        Ok(())
    }

    // == Get ==
    /// Returns the cached value, or None on a miss.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        let tracker = &self.tracker;
        let cached = self
            .store
            .get_with(key, |entry| tracker.is_stale(entry.partition_id, entry.sequence));

        match cached {
            Some(value) => self.decode(value).map(Some),
            None => Ok(None),
        }
    }

    // == Get Or Fetch ==
    /// Read-through lookup. A miss loads the value from the remote map and
    /// caches it unless an invalidation raced the load.
    pub async fn get_or_fetch(&self, key: K) -> Result<V> {
        self.ensure_open()?;
        if let Some(value) = self.get(&key)? {
            return Ok(value);
        }

        let reservation = self.tracker.reserve();
        let fetched = self
            .accessor
            .fetch(&key)
            .await
            .map_err(|e| NearCacheError::Fetch(format!("{:#}", e)))?;

        if !self.tracker.is_valid(&reservation, fetched.partition_id) {
            debug!(partition_id = fetched.partition_id, "Invalidated during fetch, not caching");
            self.stats.record_rejected_put();
            return Ok(fetched.value);
        }

        let outcome = self.put(key.clone(), fetched.value.clone(), fetched.partition_id, fetched.sequence)?;
        if outcome != PutOutcome::Rejected && !self.tracker.is_valid(&reservation, fetched.partition_id) {
            self.store.remove(&key, RemovalCause::Rejected);
        }
        Ok(fetched.value)
    }

    // == Put ==
    /// Caches a value read from the remote map at `sequence`.
    ///
    /// Values older than their partition's stale watermark are not cached.
    /// Under a memory bound, object values are charged their encoded size.
    pub fn put(&self, key: K, value: V, partition_id: PartitionId, sequence: u64) -> Result<PutOutcome> {
        if self.tracker.is_stale(partition_id, sequence) {
            self.stats.record_rejected_put();
            return Ok(PutOutcome::Rejected);
        }

        let key_bytes = if self.config.serialize_keys {
            Some(Arc::from(self.key_serializer.serialize(&key)?))
        } else {
            None
        };
        let value_cost = match self.config.in_memory_format {
            InMemoryFormat::Object if self.config.max_memory_cost.is_some() => {
                Some(self.value_serializer.serialize(&value)?.len() as u64)
            }
            _ => None,
        };
        let cached = self.encode(value)?;

        Ok(self
            .store
            .put_measured(key, cached, key_bytes, partition_id, sequence, value_cost))
    }

    // == Remove ==
    pub fn remove(&self, key: &K) -> bool {
        self.store.remove(key, RemovalCause::Removed)
    }

    /// Drops a key the caller changed remotely itself.
    pub fn invalidate(&self, key: &K) -> bool {
        self.stats.record_invalidation_request();
        self.store.remove(key, RemovalCause::Invalidated)
    }

    // == Clear ==
    /// Drops every entry. Fetches in flight will not re-cache their values.
    pub fn clear(&self) -> usize {
        self.tracker.clear(&self.store)
    }

    pub fn size(&self) -> usize {
        self.store.len()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.store.contains_key(key)
    }

    pub fn stats(&self) -> NearCacheStats {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    pub fn config(&self) -> &NearCacheConfig {
        &self.config
    }

    /// Runs an expiration and capacity sweep now.
    pub fn sweep(&self) -> Option<SweepReport> {
        self.store.sweep()
    }

    // == Invalidation ==
    /// Producer side of the bounded invalidation queue.
    pub fn invalidation_sender(&self) -> mpsc::Sender<InvalidationEvent<K>> {
        self.invalidation_tx.clone()
    }

    /// Applies one event synchronously, bypassing the queue.
    pub fn apply_invalidation(&self, event: InvalidationEvent<K>) -> InvalidationOutcome {
        self.tracker.apply(event, &self.store)
    }

    /// Wakes the reconciliation task, e.g. after the event stream reconnected.
    pub fn request_reconciliation(&self) {
        self.reconcile_now.notify_one();
    }

    /// Reconciles against the publisher now. Without a source this is a no-op.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let Some(source) = &self.invalidation_source else {
            return Ok(ReconcileReport::default());
        };
        match source.current_sequence_state().await {
            Ok(state) => Ok(self.tracker.reconcile(&state, &self.store)),
            Err(e) => {
                warn!(error = %e, "Reconciliation skipped, sequence state unavailable");
                Ok(ReconcileReport::default())
            }
        }
    }

    // == Persistence ==
    /// Writes a snapshot of the current entries to the configured file.
    pub async fn persist(&self) -> Result<PersistReport> {
        self.ensure_open()?;
        let entries = self.store.snapshot(self.config.persistence.max_keys);
        let manager = self.persistence.clone();
        let keys = Arc::clone(&self.key_serializer);
        let values = Arc::clone(&self.value_serializer);
        let cancel = self.shutdown.child_token();

        tokio::task::spawn_blocking(move || manager.persist(entries, keys.as_ref(), values.as_ref(), &cancel))
            .await
            .map_err(|e| NearCacheError::PersistenceIo(std::io::Error::other(e)))?
    }

    /// Loads a snapshot into the cache through the normal put path.
    /// Returns the number of entries admitted.
    pub async fn restore(&self) -> Result<usize> {
        self.ensure_open()?;
        let manager = self.persistence.clone();
        let keys = Arc::clone(&self.key_serializer);
        let values = Arc::clone(&self.value_serializer);
        let store = Arc::clone(&self.store);
        let tracker = Arc::clone(&self.tracker);
        let accessor = Arc::clone(&self.accessor);
        let format = self.config.in_memory_format;
        let keep_key_bytes = self.config.serialize_keys;
        let measure_objects = self.config.max_memory_cost.is_some();
        let cancel = self.shutdown.child_token();

        tokio::task::spawn_blocking(move || {
            manager.restore(keys.as_ref(), values.as_ref(), format, &cancel, |key, value, key_bytes| {
                let partition_id = accessor.partition_id(&key);
                let sequence = tracker.stale_watermark(partition_id);
                let key_bytes = if keep_key_bytes { Some(key_bytes) } else { None };
                let value_cost = match &value {
                    CachedValue::Object(object) if measure_objects => {
                        values.serialize(object).ok().map(|bytes| bytes.len() as u64)
                    }
                    _ => None,
                };
                store.put_measured(key, value, key_bytes, partition_id, sequence, value_cost)
                    != PutOutcome::Rejected
            })
        })
        .await
        .map_err(|e| NearCacheError::PersistenceIo(std::io::Error::other(e)))?
    }

    // == Close ==
    /// Stops background tasks and cancels persistence in flight.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Near cache task ended abnormally");
            }
        }
        info!(name = %self.config.name, "Near cache closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // == Internals ==

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(NearCacheError::Closed)
        } else {
            Ok(())
        }
    }

    fn encode(&self, value: V) -> Result<CachedValue<V>> {
        match self.config.in_memory_format {
            InMemoryFormat::Object => Ok(CachedValue::Object(Arc::new(value))),
            InMemoryFormat::Binary => {
                let bytes = self.value_serializer.serialize(&value)?;
                Ok(CachedValue::Binary(Arc::from(bytes)))
            }
        }
    }

    fn decode(&self, value: CachedValue<V>) -> Result<V> {
        match value {
            CachedValue::Object(value) => Ok(value.as_ref().clone()),
            CachedValue::Binary(bytes) => self.value_serializer.deserialize(&bytes),
        }
    }
}

impl<K, V> std::fmt::Debug for NearCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NearCache")
            .field("name", &self.config.name)
            .field("store", &self.store)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}
