//! Near Cache demo server
//!
//! Runs a near cache in front of an in-process simulated remote map, with
//! a writer mutating the map and publishing invalidations, a reader going
//! through the cache, and the operator API on `NEAR_CACHE_ADMIN_PORT`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use near_cache::api::create_router;
use near_cache::invalidation::{InvalidationEvent, InvalidationEventSource, SequenceState};
use near_cache::serializer::JsonSerializer;
use near_cache::{AppState, DataAccessor, Fetched, NearCache, NearCacheConfig, PartitionId};

const PARTITION_COUNT: u32 = 8;
const KEY_SPACE: u64 = 200;

// == Simulated Remote Map ==
/// Partitioned map standing in for the remote cluster. Every write bumps
/// the partition's sequence and publishes an invalidation.
struct SimulatedRemoteMap {
    data: DashMap<String, String>,
    sequences: Vec<AtomicU64>,
    source: Uuid,
}

impl SimulatedRemoteMap {
    fn new() -> Self {
        Self {
            data: DashMap::new(),
            sequences: (0..PARTITION_COUNT).map(|_| AtomicU64::new(0)).collect(),
            source: Uuid::new_v4(),
        }
    }

    fn partition_of(key: &str) -> PartitionId {
        key.bytes().fold(0u32, |h, b| h.wrapping_mul(31).wrapping_add(b as u32)) % PARTITION_COUNT
    }

    async fn write(&self, key: String, value: String, events: &mpsc::Sender<InvalidationEvent<String>>) {
        let partition_id = Self::partition_of(&key);
        self.data.insert(key.clone(), value);
        let sequence = self.sequences[partition_id as usize].fetch_add(1, Ordering::SeqCst) + 1;
        if events
            .send(InvalidationEvent::single(partition_id, key, self.source, sequence))
            .await
            .is_err()
        {
            debug!("Invalidation queue closed, event dropped");
        }
    }
}

#[async_trait]
impl DataAccessor<String, String> for SimulatedRemoteMap {
    async fn fetch(&self, key: &String) -> anyhow::Result<Fetched<String>> {
        let partition_id = Self::partition_of(key);
        let sequence = self.sequences[partition_id as usize].load(Ordering::SeqCst);
        let value = self
            .data
            .get(key)
            .map(|v| v.value().clone())
            .with_context(|| format!("key '{}' not found in remote map", key))?;
        Ok(Fetched {
            value,
            partition_id,
            sequence,
        })
    }

    fn partition_id(&self, key: &String) -> PartitionId {
        Self::partition_of(key)
    }
}

#[async_trait]
impl InvalidationEventSource for SimulatedRemoteMap {
    async fn current_sequence_state(&self) -> anyhow::Result<SequenceState> {
        let state: HashMap<_, _> = self
            .sequences
            .iter()
            .enumerate()
            .map(|(p, seq)| ((p as PartitionId, self.source), seq.load(Ordering::SeqCst)))
            .collect();
        Ok(state)
    }
}

/// Main entry point for the near cache demo.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Build the cache, restore a snapshot if persistence is enabled
/// 4. Start background tasks and the simulated workload
/// 5. Serve the operator API until SIGINT/SIGTERM
/// 6. Persist, close the cache
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "near_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting near cache demo");

    let config = NearCacheConfig::from_env();
    let port: u16 = std::env::var("NEAR_CACHE_ADMIN_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    info!(
        "Configuration loaded: name={}, max_size={}, eviction={:?}, format={:?}",
        config.name, config.max_size, config.eviction_policy, config.in_memory_format
    );

    let remote = Arc::new(SimulatedRemoteMap::new());
    for i in 0..KEY_SPACE {
        remote.data.insert(format!("key-{}", i), format!("value-{}-0", i));
    }

    let persistence_enabled = config.persistence.enabled;
    let cache = Arc::new(
        NearCache::<String, String>::new(
            config,
            remote.clone(),
            Arc::new(JsonSerializer::<String>::new()),
            Arc::new(JsonSerializer::<String>::new()),
        )?
        .with_invalidation_source(remote.clone()),
    );

    if persistence_enabled {
        match cache.restore().await {
            Ok(restored) => info!(restored, "Warm start from snapshot"),
            Err(e) => warn!(error = %e, "No snapshot restored, starting cold"),
        }
    }
    cache.start().await?;

    let workload = CancellationToken::new();
    let writer = spawn_writer(remote.clone(), cache.invalidation_sender(), workload.clone());
    let reader = spawn_reader(cache.clone(), workload.clone());

    let app = create_router(AppState::new(cache.clone()));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Operator API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("operator API failed")?;

    workload.cancel();
    let (writer, reader) = tokio::join!(writer, reader);
    for (task, result) in [("writer", writer), ("reader", reader)] {
        if let Err(e) = result {
            warn!(task, error = %e, "Workload task ended abnormally");
        }
    }

    if persistence_enabled {
        if let Err(e) = cache.persist().await {
            warn!(error = %e, "Final snapshot failed");
        }
    }
    cache.close().await;

    info!("Shutdown complete");
    Ok(())
}

/// Mutates a random key every 50ms.
fn spawn_writer(
    remote: Arc<SimulatedRemoteMap>,
    events: mpsc::Sender<InvalidationEvent<String>>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut version = 0u64;
        let mut ticker = tokio::time::interval(Duration::from_millis(50));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            version += 1;
            let i = fastrand::u64(0..KEY_SPACE);
            remote
                .write(format!("key-{}", i), format!("value-{}-{}", i, version), &events)
                .await;
        }
    })
}

/// Reads random keys through the cache every 5ms.
fn spawn_reader(cache: Arc<NearCache<String, String>>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(5));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let key = format!("key-{}", fastrand::u64(0..KEY_SPACE));
            if let Err(e) = cache.get_or_fetch(key).await {
                debug!(error = %e, "Read failed");
            }
        }
    })
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
