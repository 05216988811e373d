//! Wires the watchers, the debounce and the broadcaster together.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::debounce::DebounceScheduler;
use super::snapshot::{LayersResponse, SnapshotBuilder};
use super::watcher::{ChangeNotice, ResourceWatcher};
use crate::broadcast::{DeliveryStats, Payload, SubscriberRegistry, Subscription};
use crate::config::ServerConfig;
use crate::error::WatchError;
use crate::resource::{Layer, Repository, Run};
use crate::store::ResourceStore;

/// Capacity of the queue between the watchers and the coalescing task.
const NOTICE_BUFFER: usize = 1024;

/// Live notification pipeline:
/// watchers → debounce → snapshot → dedup → subscribers.
pub struct WatchManager {
    builder: SnapshotBuilder,
    registry: SubscriberRegistry,
    tasks: Vec<JoinHandle<()>>,
}

impl WatchManager {
    /// Starts the three watchers and waits for their initial listings.
    /// Failing to sync within the configured timeout is fatal.
    pub async fn start(
        store: Arc<dyn ResourceStore>,
        config: &ServerConfig,
    ) -> Result<Self, WatchError> {
        let (notices, notice_rx) = mpsc::channel(NOTICE_BUFFER);
        let layers = ResourceWatcher::<Layer>::new(Arc::clone(&store), notices.clone());
        let runs = ResourceWatcher::<Run>::new(Arc::clone(&store), notices.clone());
        let repositories = ResourceWatcher::<Repository>::new(store, notices);
        let builder = SnapshotBuilder::new(layers.mirror(), runs.mirror(), repositories.mirror());

        let timeout = config.initial_sync_timeout();
        let synced = async {
            tokio::try_join!(layers.start(), runs.start(), repositories.start())
        };
        let (layers_task, runs_task, repositories_task) = tokio::time::timeout(timeout, synced)
            .await
            .map_err(|_| WatchError::InitialSyncTimeout {
                secs: timeout.as_secs(),
            })??;

        let registry = SubscriberRegistry::new(config.subscriber_buffer);
        let last_sent = Arc::new(Mutex::new(builder.render().ok()));

        let (debounce, fired) = DebounceScheduler::new(config.debounce());
        let coalescer = tokio::spawn(coalesce(notice_rx, debounce));
        let rebuilder = tokio::spawn(rebuild(
            fired,
            builder.clone(),
            registry.clone(),
            last_sent,
        ));

        log::info!(
            "Watch pipeline started (debounce {}ms, subscriber buffer {})",
            config.debounce_millis,
            config.subscriber_buffer
        );

        Ok(Self {
            builder,
            registry,
            tasks: vec![
                layers_task,
                runs_task,
                repositories_task,
                coalescer,
                rebuilder,
            ],
        })
    }

    /// Registers a client. The subscription ends when it is dropped.
    pub fn subscribe(&self) -> Subscription {
        self.registry.subscribe()
    }

    /// Returns the number of connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    /// Current view of all layers.
    pub fn snapshot(&self) -> LayersResponse {
        self.builder.build()
    }

    /// Current view of all layers, serialized.
    pub fn render(&self) -> Result<Payload, serde_json::Error> {
        self.builder.render()
    }
}

impl Drop for WatchManager {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Turns every change notice into a debounce touch.
async fn coalesce(mut notices: mpsc::Receiver<ChangeNotice>, debounce: DebounceScheduler) {
    while let Some(notice) = notices.recv().await {
        log::trace!(
            "{} {} {:?}, rearming debounce",
            notice.kind,
            notice.key,
            notice.change_type
        );
        debounce.touch();
    }
}

async fn rebuild(
    mut fired: mpsc::Receiver<u64>,
    builder: SnapshotBuilder,
    registry: SubscriberRegistry,
    last_sent: Arc<Mutex<Option<Payload>>>,
) {
    while let Some(generation) = fired.recv().await {
        if let Some(stats) = publish(&builder, &registry, &last_sent) {
            log::debug!(
                "Snapshot generation {} delivered to {} subscribers ({} dropped)",
                generation,
                stats.delivered,
                stats.dropped
            );
        }
    }
}

/// Renders a snapshot and broadcasts it unless it equals the last one sent.
fn publish(
    builder: &SnapshotBuilder,
    registry: &SubscriberRegistry,
    last_sent: &Mutex<Option<Payload>>,
) -> Option<DeliveryStats> {
    let payload = match builder.render() {
        Ok(payload) => payload,
        Err(e) => {
            log::error!("Failed to serialize layers snapshot: {}", e);
            return None;
        }
    };

    {
        let mut last = lock(last_sent);
        if last.as_deref() == Some(&*payload) {
            log::trace!("Snapshot unchanged, skipping broadcast");
            return None;
        }
        *last = Some(Arc::clone(&payload));
    }

    Some(registry.broadcast(payload))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("Snapshot lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}
