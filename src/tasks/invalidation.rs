//! Invalidation Listener Task
//!
//! Drains the bounded invalidation queue in arrival order and applies
//! each event to the store.

use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::EntryStore;
use crate::invalidation::{InvalidationEvent, InvalidationOutcome, InvalidationTracker};

pub fn spawn_invalidation_listener<K, V>(
    tracker: Arc<InvalidationTracker>,
    store: Arc<EntryStore<K, V>>,
    mut events: mpsc::Receiver<InvalidationEvent<K>>,
    shutdown: CancellationToken,
) -> JoinHandle<()>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    tokio::spawn(async move {
        info!("Starting invalidation listener");

        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => {
                        debug!("Invalidation queue closed");
                        break;
                    }
                },
            };

            if let InvalidationOutcome::Cleared { entries } = tracker.apply(event, &store) {
                debug!(entries, "Invalidation listener cleared the near cache");
            }
        }

        debug!("Invalidation listener stopped");
    })
}
