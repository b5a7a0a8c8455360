//! Reconciliation Task
//!
//! Periodically, and whenever woken through the notify handle, compares
//! local sequence state with the publisher's. Catches losses the gap
//! check cannot see, such as the last events before a quiet period.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::EntryStore;
use crate::invalidation::{InvalidationEventSource, InvalidationTracker};

pub fn spawn_reconciliation_task<K, V>(
    tracker: Arc<InvalidationTracker>,
    store: Arc<EntryStore<K, V>>,
    source: Arc<dyn InvalidationEventSource>,
    interval: Duration,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
) -> JoinHandle<()>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "Starting reconciliation task");

        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
                _ = wake.notified() => debug!("Reconciliation requested"),
            }

            let state = tokio::select! {
                _ = shutdown.cancelled() => break,
                state = source.current_sequence_state() => state,
            };

            match state {
                Ok(state) => {
                    let report = tracker.reconcile(&state, &store);
                    debug!(
                        initialized = report.initialized,
                        behind = report.behind,
                        cleared = report.cleared,
                        "Reconciliation finished"
                    );
                }
                Err(e) => warn!(error = %e, "Reconciliation skipped, sequence state unavailable"),
            }
        }

        debug!("Reconciliation task stopped");
    })
}
