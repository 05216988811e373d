//! Test harness for reconciling layers in isolation.
//!
//! The `TestHarness` owns an in-memory store, an event recorder and a
//! reconciler whose clock is pinned to [`now`].

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::broadcast;

use driftwatch::broadcast::{DiagnosticEvent, EventRecorder};
use driftwatch::config::ControllerConfig;
use driftwatch::controller::Reconciler;
use driftwatch::resource::{Layer, Repository, Run, StoreObject};
use driftwatch::store::{runs_for_layer, InMemoryStore, ResourceStore};

use super::builders::NAMESPACE;

/// Wednesday 2026-03-04 10:00 UTC.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 4, 10, 0, 0).unwrap()
}

pub struct TestHarness {
    pub store: Arc<InMemoryStore>,
    pub reconciler: Reconciler,
    pub config: ControllerConfig,
    events: broadcast::Receiver<DiagnosticEvent>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(ControllerConfig::default())
    }

    pub fn with_config(config: ControllerConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let recorder = EventRecorder::default();
        let events = recorder.subscribe();
        let dyn_store: Arc<dyn ResourceStore> = store.clone();
        let reconciler = Reconciler::new(dyn_store, config.clone(), recorder)
            .with_clock(Arc::new(now));
        Self {
            store,
            reconciler,
            config,
            events,
        }
    }

    pub async fn add_layer(&self, layer: Layer) {
        self.store.apply(layer.into_any()).await.unwrap();
    }

    pub async fn add_repository(&self, repository: Repository) {
        self.store.apply(repository.into_any()).await.unwrap();
    }

    pub async fn add_run(&self, run: Run) -> Run {
        self.store.create_run(run).await.unwrap()
    }

    pub async fn reconcile(&self, layer: &str) -> Option<Duration> {
        self.reconciler.reconcile(NAMESPACE, layer).await.unwrap()
    }

    pub async fn layer(&self, name: &str) -> Layer {
        self.store.get_layer(NAMESPACE, name).await.unwrap()
    }

    /// Runs of the layer, newest first.
    pub async fn runs(&self, name: &str) -> Vec<Run> {
        let layer = self.layer(name).await;
        runs_for_layer(self.store.as_ref(), &layer).await.unwrap()
    }

    /// Diagnostic reasons recorded since the last call.
    pub fn reasons(&mut self) -> Vec<String> {
        let mut reasons = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            reasons.push(event.reason);
        }
        reasons
    }
}
