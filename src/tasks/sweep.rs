//! Expiration Sweep Task
//!
//! Periodically removes expired entries so they stop counting against
//! capacity even when nobody reads them.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::EntryStore;

/// Spawns the sweep loop.
///
/// The first sweep runs one `interval` after spawning. A tick that finds
/// a sweep still running is skipped, and late ticks are not bunched up.
pub fn spawn_sweep_task<K, V>(
    store: Arc<EntryStore<K, V>>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "Starting expiration sweep task");

        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match store.sweep() {
                Some(report) if report.expired + report.evicted > 0 => {
                    info!(expired = report.expired, evicted = report.evicted, "Sweep removed entries");
                }
                Some(_) => debug!("Sweep found nothing to remove"),
                None => debug!("Sweep already running, tick skipped"),
            }
        }

        debug!("Expiration sweep task stopped");
    })
}
