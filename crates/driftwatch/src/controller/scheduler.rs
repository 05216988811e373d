//! Drives reconciliation of every layer in the store.
//!
//! Each layer gets its own task, so passes over one layer never overlap
//! while different layers proceed concurrently. A task sleeps for the delay
//! returned by its last pass, or until the layer's spec or annotations
//! change.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use super::reconciler::Reconciler;
use crate::resource::{Layer, LayerSpec, StoreObject};
use crate::store::{Result, WatchEvent};

/// What a layer task reacts to. Status writes are excluded so the
/// controller's own writes do not retrigger it.
#[derive(Debug, Clone, PartialEq)]
struct Trigger {
    spec: LayerSpec,
    annotations: HashMap<String, String>,
}

impl Trigger {
    fn of(layer: &Layer) -> Self {
        Self {
            spec: layer.spec.clone(),
            annotations: layer.metadata.annotations.clone(),
        }
    }
}

struct LayerTask {
    wake: Arc<Notify>,
    trigger: Trigger,
    handle: JoinHandle<()>,
}

pub struct Controller {
    reconciler: Arc<Reconciler>,
    shutdown: watch::Sender<bool>,
}

impl Controller {
    /// Creates a controller driving `reconciler`.
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            reconciler,
            shutdown,
        }
    }

    /// Starts watching layers and reconciling them. The returned handle
    /// completes after [`Controller::stop`].
    pub async fn start(&self) -> Result<JoinHandle<()>> {
        let stream = self
            .reconciler
            .store()
            .watch(crate::resource::ResourceKind::Layer)
            .await?;
        let reconciler = Arc::clone(&self.reconciler);
        let mut shutdown = self.shutdown.subscribe();

        let handle = tokio::spawn(async move {
            let mut tasks: HashMap<String, LayerTask> = HashMap::new();
            for resource in stream.initial {
                if let Some(layer) = Layer::from_any(resource) {
                    track(&reconciler, &shutdown, &mut tasks, &layer);
                }
            }
            log::info!("Controller started with {} layers", tasks.len());

            let mut events = stream.events;
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    event = events.recv() => match event {
                        Ok(WatchEvent::Added(resource)) | Ok(WatchEvent::Modified(resource)) => {
                            if let Some(layer) = Layer::from_any(resource) {
                                track(&reconciler, &shutdown, &mut tasks, &layer);
                            }
                        }
                        Ok(WatchEvent::Deleted(resource)) => {
                            if let Some(task) = tasks.remove(&resource.key()) {
                                log::info!("Layer {} deleted, stopping its reconciliation", resource.key());
                                task.handle.abort();
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            log::warn!("Controller missed {} layer events, relisting", skipped);
                            relist(&reconciler, &shutdown, &mut tasks).await;
                        }
                        Err(RecvError::Closed) => {
                            log::warn!("Layer watch closed, controller stopping");
                            break;
                        }
                    },
                }
            }

            for (_, task) in tasks.drain() {
                task.handle.abort();
            }
            log::info!("Controller stopped");
        });

        Ok(handle)
    }

    /// Signals the controller and every layer task to stop.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }
}

/// Starts a task for a new layer, or wakes the existing one if something it
/// reacts to changed.
fn track(
    reconciler: &Arc<Reconciler>,
    shutdown: &watch::Receiver<bool>,
    tasks: &mut HashMap<String, LayerTask>,
    layer: &Layer,
) {
    let key = layer.key();
    let trigger = Trigger::of(layer);

    if let Some(task) = tasks.get_mut(&key) {
        if !task.handle.is_finished() {
            if task.trigger != trigger {
                task.trigger = trigger;
                task.wake.notify_one();
            }
            return;
        }
    }

    let wake = Arc::new(Notify::new());
    let handle = tokio::spawn(run_layer(
        Arc::clone(reconciler),
        layer.namespace().to_string(),
        layer.name().to_string(),
        Arc::clone(&wake),
        shutdown.clone(),
    ));
    tasks.insert(
        key,
        LayerTask {
            wake,
            trigger,
            handle,
        },
    );
}

async fn relist(
    reconciler: &Arc<Reconciler>,
    shutdown: &watch::Receiver<bool>,
    tasks: &mut HashMap<String, LayerTask>,
) {
    let layers = match reconciler.store().list_layers().await {
        Ok(layers) => layers,
        Err(e) => {
            log::error!("Failed to relist layers: {}", e);
            return;
        }
    };

    let present: std::collections::HashSet<String> = layers.iter().map(|l| l.key()).collect();
    tasks.retain(|key, task| {
        let keep = present.contains(key);
        if !keep {
            task.handle.abort();
        }
        keep
    });
    for layer in &layers {
        track(reconciler, shutdown, tasks, layer);
    }
}

async fn run_layer(
    reconciler: Arc<Reconciler>,
    namespace: String,
    name: String,
    wake: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let delay = match reconciler.reconcile(&namespace, &name).await {
            Ok(Some(delay)) => delay,
            Ok(None) => break,
            Err(e) => {
                log::error!("Failed to reconcile layer {}/{}: {}", namespace, name, e);
                reconciler.config().timers.on_error_interval()
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = wake.notified() => {
                log::debug!("Layer {}/{} changed, reconciling early", namespace, name);
            }
            _ = shutdown.changed() => break,
        }
    }
}
