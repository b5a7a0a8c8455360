//! Integration Tests for the Near Cache
//!
//! Drives the public surface end to end: eviction, expiration,
//! invalidation ordering, read-through coherence, persistence and close.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

use near_cache::cache::PutOutcome;
use near_cache::clock::ManualClock;
use near_cache::invalidation::{InvalidationEvent, InvalidationEventSource, InvalidationOutcome, SequenceState};
use near_cache::serializer::JsonSerializer;
use near_cache::{
    DataAccessor, EvictionPolicyKind, Fetched, InMemoryFormat, NearCache, NearCacheConfig, NearCacheError,
    PartitionId, PersistenceConfig,
};

// == Test Doubles ==

/// Remote map with fixed contents. Keys starting with "p1-" live in
/// partition 1, everything else in partition 0.
#[derive(Default)]
struct RemoteMap {
    data: DashMap<String, String>,
    fetches: AtomicUsize,
    /// When set, fetch waits here before answering
    gate: Mutex<Option<Arc<Notify>>>,
    started: Notify,
}

impl RemoteMap {
    fn with(entries: &[(&str, &str)]) -> Arc<Self> {
        let remote = Self::default();
        for (k, v) in entries {
            remote.data.insert(k.to_string(), v.to_string());
        }
        Arc::new(remote)
    }

    fn partition(key: &str) -> PartitionId {
        if key.starts_with("p1-") {
            1
        } else {
            0
        }
    }
}

#[async_trait]
impl DataAccessor<String, String> for RemoteMap {
    async fn fetch(&self, key: &String) -> anyhow::Result<Fetched<String>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            self.started.notify_one();
            gate.notified().await;
        }
        let value = self
            .data
            .get(key)
            .map(|v| v.value().clone())
            .ok_or_else(|| anyhow::anyhow!("no such key: {}", key))?;
        Ok(Fetched {
            value,
            partition_id: Self::partition(key),
            sequence: 0,
        })
    }

    fn partition_id(&self, key: &String) -> PartitionId {
        Self::partition(key)
    }
}

struct FixedSource(Mutex<SequenceState>);

#[async_trait]
impl InvalidationEventSource for FixedSource {
    async fn current_sequence_state(&self) -> anyhow::Result<SequenceState> {
        Ok(self.0.lock().clone())
    }
}

fn build(config: NearCacheConfig, remote: Arc<RemoteMap>, clock: Arc<ManualClock>) -> NearCache<String, String> {
    NearCache::<String, String>::with_clock(
        config,
        remote,
        Arc::new(JsonSerializer::<String>::new()),
        Arc::new(JsonSerializer::<String>::new()),
        clock,
    )
    .unwrap()
}

fn build_default(config: NearCacheConfig) -> NearCache<String, String> {
    build(config, RemoteMap::with(&[]), Arc::new(ManualClock::new(0)))
}

fn put(cache: &NearCache<String, String>, key: &str, value: &str) -> PutOutcome {
    cache.put(key.to_string(), value.to_string(), 0, 0).unwrap()
}

fn get(cache: &NearCache<String, String>, key: &str) -> Option<String> {
    cache.get(&key.to_string()).unwrap()
}

// == Eviction ==

#[test]
fn test_lru_evicts_least_recently_used() {
    let cache = build_default(
        NearCacheConfig::new("lru")
            .with_max_size(3)
            .with_eviction_policy(EvictionPolicyKind::Lru),
    );
    put(&cache, "a", "1");
    put(&cache, "b", "2");
    put(&cache, "c", "3");
    assert_eq!(get(&cache, "a"), Some("1".to_string()));

    put(&cache, "d", "4");

    assert_eq!(cache.size(), 3);
    assert!(cache.contains_key(&"a".to_string()));
    assert!(!cache.contains_key(&"b".to_string()));
    assert!(cache.contains_key(&"c".to_string()));
    assert!(cache.contains_key(&"d".to_string()));
    assert_eq!(cache.stats().evictions, 1);
}

#[test]
fn test_none_policy_rejects_new_keys_when_full() {
    let cache = build_default(
        NearCacheConfig::new("none")
            .with_max_size(1)
            .with_eviction_policy(EvictionPolicyKind::None),
    );
    assert_eq!(put(&cache, "a", "1"), PutOutcome::Inserted);
    assert_eq!(put(&cache, "b", "2"), PutOutcome::Rejected);

    assert_eq!(get(&cache, "a"), Some("1".to_string()));
    assert_eq!(get(&cache, "b"), None);
    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.evictions, 0);
}

#[test]
fn test_lfu_keeps_frequently_read_keys() {
    let cache = build_default(
        NearCacheConfig::new("lfu")
            .with_max_size(2)
            .with_eviction_policy(EvictionPolicyKind::Lfu),
    );
    put(&cache, "hot", "1");
    put(&cache, "cold", "2");
    for _ in 0..3 {
        get(&cache, "hot");
    }
    put(&cache, "new", "3");

    assert!(cache.contains_key(&"hot".to_string()));
    assert!(!cache.contains_key(&"cold".to_string()));
}

#[test]
fn test_object_values_charged_encoded_size_under_memory_bound() {
    let cache = build_default(
        NearCacheConfig::new("object-cost")
            .with_max_size(100)
            .with_max_memory_cost(4_096)
            .with_eviction_policy(EvictionPolicyKind::Lru),
    );
    let large = "x".repeat(1_000);
    assert_eq!(put(&cache, "a", &large), PutOutcome::Inserted);
    assert!(cache.stats().owned_entry_memory_cost > 1_000);

    // Four values this size no longer fit; the oldest goes.
    for key in ["b", "c", "d"] {
        put(&cache, key, &large);
    }
    assert!(!cache.contains_key(&"a".to_string()));
    assert!(cache.stats().owned_entry_memory_cost <= 4_096);

    // A single value above the bound is refused and the rest stay.
    let size = cache.size();
    assert_eq!(put(&cache, "huge", &"y".repeat(10_000)), PutOutcome::Rejected);
    assert_eq!(cache.size(), size);
    assert_eq!(cache.stats().rejected_puts, 1);
}

// == Expiration ==

#[test]
fn test_ttl_expiry_is_a_miss() {
    let clock = Arc::new(ManualClock::new(0));
    let cache = build(
        NearCacheConfig::new("ttl").with_time_to_live(Duration::from_millis(100)),
        RemoteMap::with(&[]),
        Arc::clone(&clock),
    );
    put(&cache, "k", "v");

    clock.set(150);
    assert_eq!(get(&cache, "k"), None);

    let stats = cache.stats();
    assert_eq!(stats.expirations, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(cache.size(), 0);
}

#[test]
fn test_max_idle_refreshed_by_reads() {
    let clock = Arc::new(ManualClock::new(0));
    let cache = build(
        NearCacheConfig::new("idle").with_max_idle(Duration::from_millis(100)),
        RemoteMap::with(&[]),
        Arc::clone(&clock),
    );
    put(&cache, "k", "v");

    clock.set(80);
    assert!(get(&cache, "k").is_some());
    clock.set(160);
    assert!(get(&cache, "k").is_some());
    clock.set(300);
    assert!(get(&cache, "k").is_none());
}

#[test]
fn test_sweep_reclaims_unread_expired_entries() {
    let clock = Arc::new(ManualClock::new(0));
    let cache = build(
        NearCacheConfig::new("sweep").with_time_to_live(Duration::from_millis(10)),
        RemoteMap::with(&[]),
        Arc::clone(&clock),
    );
    for key in ["a", "b", "c"] {
        put(&cache, key, "v");
    }
    clock.advance(Duration::from_millis(20));

    let report = cache.sweep().unwrap();
    assert_eq!(report.expired, 3);
    assert_eq!(cache.size(), 0);
    assert_eq!(cache.stats().owned_entry_count, 0);
}

// == Invalidation ==

#[test]
fn test_sequence_gap_clears_cache() {
    let cache = build_default(NearCacheConfig::new("gap"));
    let source = Uuid::new_v4();
    for key in ["x", "y", "z"] {
        put(&cache, key, "v");
    }

    let outcome = cache.apply_invalidation(InvalidationEvent::single(0, "x".to_string(), source, 1));
    assert_eq!(outcome, InvalidationOutcome::Applied { removed: true });
    cache.apply_invalidation(InvalidationEvent::single(0, "nothing".to_string(), source, 2));
    assert_eq!(cache.size(), 2);

    let outcome = cache.apply_invalidation(InvalidationEvent::single(0, "nothing".to_string(), source, 4));
    assert_eq!(outcome, InvalidationOutcome::Cleared { entries: 2 });
    assert_eq!(cache.size(), 0);

    // Values read before the gap are no longer admitted.
    assert_eq!(
        cache.put("y".to_string(), "old".to_string(), 0, 3).unwrap(),
        PutOutcome::Rejected
    );
    assert_eq!(
        cache.put("y".to_string(), "new".to_string(), 0, 4).unwrap(),
        PutOutcome::Inserted
    );
}

#[test]
fn test_duplicate_invalidation_is_ignored() {
    let cache = build_default(NearCacheConfig::new("dup"));
    let source = Uuid::new_v4();
    put(&cache, "k", "v");
    cache.apply_invalidation(InvalidationEvent::single(0, "k".to_string(), source, 1));
    let requests = cache.stats().invalidation_requests;

    put(&cache, "k", "v2");
    let outcome = cache.apply_invalidation(InvalidationEvent::single(0, "k".to_string(), source, 1));

    assert_eq!(outcome, InvalidationOutcome::Ignored);
    assert_eq!(get(&cache, "k"), Some("v2".to_string()));
    assert_eq!(cache.stats().invalidation_requests, requests);
}

#[test]
fn test_whole_map_invalidation_clears_everything() {
    let cache = build_default(NearCacheConfig::new("all"));
    put(&cache, "a", "1");
    put(&cache, "b", "2");

    let outcome = cache.apply_invalidation(InvalidationEvent::all(Uuid::new_v4(), 9));
    assert_eq!(outcome, InvalidationOutcome::Cleared { entries: 2 });
    assert_eq!(cache.size(), 0);
}

#[tokio::test]
async fn test_queued_invalidations_applied_after_start() {
    let cache = build_default(NearCacheConfig::new("queue"));
    cache.start().await.unwrap();
    put(&cache, "k", "v");

    let sender = cache.invalidation_sender();
    sender
        .send(InvalidationEvent::single(0, "k".to_string(), Uuid::new_v4(), 1))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(2), async {
        while cache.contains_key(&"k".to_string()) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("invalidation should be applied");

    assert_eq!(cache.stats().invalidations, 1);
    cache.close().await;
}

#[tokio::test]
async fn test_reconcile_clears_when_publisher_is_ahead() {
    let source_id = Uuid::new_v4();
    let source = Arc::new(FixedSource(Mutex::new(HashMap::from([((0, source_id), 2)]))));
    let cache = build_default(NearCacheConfig::new("reconcile")).with_invalidation_source(source.clone());
    cache.start().await.unwrap();
    put(&cache, "k", "v");

    let report = assert_ok!(cache.reconcile().await);
    assert_eq!(report.behind, 0);
    assert_eq!(cache.size(), 1);

    source.0.lock().insert((0, source_id), 5);
    let report = assert_ok!(cache.reconcile().await);
    assert_eq!(report.behind, 1);
    assert_eq!(report.cleared, 1);
    assert_eq!(cache.size(), 0);

    cache.close().await;
}

// == Read-Through ==

#[tokio::test]
async fn test_get_or_fetch_caches_remote_value() {
    let remote = RemoteMap::with(&[("k", "remote")]);
    let cache = build(NearCacheConfig::new("fetch"), remote.clone(), Arc::new(ManualClock::new(0)));

    assert_eq!(cache.get_or_fetch("k".to_string()).await.unwrap(), "remote");
    assert_eq!(cache.get_or_fetch("k".to_string()).await.unwrap(), "remote");
    assert_eq!(remote.fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_fetch_failure_is_reported_and_not_cached() {
    let cache = build_default(NearCacheConfig::new("fail"));

    let err = assert_err!(cache.get_or_fetch("missing".to_string()).await);
    assert!(matches!(err, NearCacheError::Fetch(_)));
    assert_eq!(cache.size(), 0);
}

#[tokio::test]
async fn test_invalidation_during_fetch_is_not_cached() {
    let remote = RemoteMap::with(&[("k", "old")]);
    let gate = Arc::new(Notify::new());
    *remote.gate.lock() = Some(Arc::clone(&gate));
    let cache = Arc::new(build(NearCacheConfig::new("race"), remote.clone(), Arc::new(ManualClock::new(0))));

    let reader = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move { cache.get_or_fetch("k".to_string()).await })
    };
    remote.started.notified().await;

    cache.apply_invalidation(InvalidationEvent::single(0, "k".to_string(), Uuid::new_v4(), 1));
    gate.notify_one();

    assert_eq!(reader.await.unwrap().unwrap(), "old");
    assert!(!cache.contains_key(&"k".to_string()));
    assert_eq!(cache.stats().rejected_puts, 1);
}

#[tokio::test]
async fn test_invalidation_in_other_partition_does_not_block_caching() {
    let remote = RemoteMap::with(&[("k", "value")]);
    let gate = Arc::new(Notify::new());
    *remote.gate.lock() = Some(Arc::clone(&gate));
    let cache = Arc::new(build(NearCacheConfig::new("other"), remote.clone(), Arc::new(ManualClock::new(0))));

    let reader = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move { cache.get_or_fetch("k".to_string()).await })
    };
    remote.started.notified().await;

    cache.apply_invalidation(InvalidationEvent::single(1, "p1-x".to_string(), Uuid::new_v4(), 1));
    gate.notify_one();

    assert_eq!(reader.await.unwrap().unwrap(), "value");
    assert!(cache.contains_key(&"k".to_string()));
}

// == Binary Format ==

#[test]
fn test_binary_format_returns_decoded_values() {
    let cache = build_default(
        NearCacheConfig::new("binary")
            .with_in_memory_format(InMemoryFormat::Binary)
            .with_serialize_keys(true),
    );
    put(&cache, "k", "value");

    assert_eq!(get(&cache, "k"), Some("value".to_string()));
    assert!(cache.stats().owned_entry_memory_cost > 0);
}

// == Persistence ==

fn persistent(name: &str, path: std::path::PathBuf) -> NearCacheConfig {
    NearCacheConfig::new(name).with_persistence(PersistenceConfig {
        enabled: true,
        file_path: Some(path),
        batch_size: 2,
        ..PersistenceConfig::default()
    })
}

#[tokio::test]
async fn test_persist_then_restore_into_fresh_cache() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("near-cache.snapshot");

    let first = build_default(persistent("first", path.clone()));
    for i in 0..7 {
        put(&first, &format!("key-{}", i), &format!("value-{}", i));
    }
    let report = assert_ok!(first.persist().await);
    assert_eq!(report.keys, 7);
    assert_eq!(first.stats().persistence.last_persistence_key_count, 7);
    first.close().await;

    let second = build_default(persistent("second", path).with_in_memory_format(InMemoryFormat::Binary));
    let restored = assert_ok!(second.restore().await);

    assert_eq!(restored, 7);
    assert_eq!(second.size(), 7);
    for i in 0..7 {
        assert_eq!(get(&second, &format!("key-{}", i)), Some(format!("value-{}", i)));
    }
    assert_eq!(second.stats().restored_keys, 7);
}

#[tokio::test]
async fn test_restore_respects_capacity() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("near-cache.snapshot");

    let first = build_default(persistent("big", path.clone()));
    for i in 0..10 {
        put(&first, &format!("key-{}", i), "v");
    }
    assert_ok!(first.persist().await);

    let small = build_default(
        persistent("small", path)
            .with_max_size(4)
            .with_eviction_policy(EvictionPolicyKind::None),
    );
    let restored = assert_ok!(small.restore().await);

    assert_eq!(restored, 4);
    assert_eq!(small.size(), 4);
}

#[tokio::test]
async fn test_persist_limited_by_max_keys() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = persistent("limited", dir.path().join("near-cache.snapshot"));
    config.persistence.max_keys = Some(3);
    let cache = build_default(config);
    for i in 0..10 {
        put(&cache, &format!("key-{}", i), "v");
    }

    let report = assert_ok!(cache.persist().await);
    assert_eq!(report.keys, 3);
}

// == Close ==

#[tokio::test]
async fn test_close_stops_operations() {
    let cache = build_default(NearCacheConfig::new("close"));
    cache.start().await.unwrap();

    cache.close().await;
    cache.close().await;

    assert!(cache.is_closed());
    let err = assert_err!(cache.get_or_fetch("k".to_string()).await);
    assert!(matches!(err, NearCacheError::Closed));
    assert!(matches!(cache.start().await, Err(NearCacheError::Closed)));
}

#[test]
fn test_invalid_config_fails_fast() {
    let result = NearCache::<String, String>::new(
        NearCacheConfig::new("broken").with_max_size(0),
        RemoteMap::with(&[]),
        Arc::new(JsonSerializer::<String>::new()),
        Arc::new(JsonSerializer::<String>::new()),
    );
    assert!(matches!(result, Err(NearCacheError::Configuration(_))));
}
