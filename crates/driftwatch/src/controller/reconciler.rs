//! One reconciliation pass over a single layer.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::Instrument;

use super::conditions::{ConditionEvaluator, LayerContext};
use super::engine::decide;
use super::states::ActContext;
use crate::annotations;
use crate::broadcast::EventRecorder;
use crate::config::ControllerConfig;
use crate::resource::{object_key, LayerRun};
use crate::store::{modify_layer, runs_for_layer, ResourceStore, Result};

/// Source of the current time.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct Reconciler {
    store: Arc<dyn ResourceStore>,
    config: ControllerConfig,
    recorder: EventRecorder,
    evaluator: ConditionEvaluator,
    clock: Clock,
}

impl Reconciler {
    /// Creates a reconciler using the wall clock.
    pub fn new(
        store: Arc<dyn ResourceStore>,
        config: ControllerConfig,
        recorder: EventRecorder,
    ) -> Self {
        let evaluator = ConditionEvaluator::new(
            config.timers.drift_detection_interval(),
            config.max_retries,
        );
        Self {
            store,
            config,
            recorder,
            evaluator,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replaces the wall clock, for tests.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }

    /// Returns the controller configuration.
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Returns the diagnostics recorder.
    pub fn recorder(&self) -> &EventRecorder {
        &self.recorder
    }

    /// Reconciles the layer `namespace/name`. Returns when to look at it
    /// again, or `None` if the layer no longer exists.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Option<Duration>> {
        let span = tracing::info_span!("reconcile", layer = %object_key(namespace, name));
        self.reconcile_inner(namespace, name).instrument(span).await
    }

    async fn reconcile_inner(&self, namespace: &str, name: &str) -> Result<Option<Duration>> {
        let store = self.store.as_ref();
        let timers = &self.config.timers;

        let mut layer = match store.get_layer(namespace, name).await {
            Ok(layer) => layer,
            Err(e) if e.is_not_found() => {
                log::debug!("Layer {}/{} is gone, stopping", namespace, name);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let repo_ref = &layer.spec.repository;
        let repository = match store
            .get_repository(repo_ref.namespace_or(namespace), &repo_ref.name)
            .await
        {
            Ok(repository) => repository,
            Err(e) if e.is_not_found() => {
                self.recorder.warning(
                    &layer,
                    "RepositoryNotFound",
                    format!("Repository {} does not exist", layer.repository_key()),
                );
                return Ok(Some(timers.on_error_interval()));
            }
            Err(e) => return Err(e),
        };

        let runs = runs_for_layer(store, &layer).await?;
        let last_run = layer
            .status
            .last_run
            .as_ref()
            .and_then(|reference| runs.iter().find(|run| run.name() == reference.name));

        let now = (self.clock)();
        let evaluation = self.evaluator.evaluate(
            &LayerContext {
                layer: &layer,
                repository: &repository,
                last_run,
                runs: &runs,
            },
            now,
        );

        let decision = decide(&evaluation.conditions);
        if decision.anomaly {
            log::error!(
                "No rule matched for layer {} (conditions: {:?}), defaulting to Idle",
                layer.key(),
                evaluation.conditions
            );
        }
        log::debug!("Layer {} decided {}", layer.key(), decision.state);

        if let Some(signal) = decision.consume {
            let annotation = signal.annotation();
            layer = annotations::remove(store, &layer, annotation).await?;
            log::info!("Consumed {} on layer {}", annotation, layer.key());
        }

        let outcome = decision
            .state
            .act(
                &ActContext {
                    store,
                    recorder: &self.recorder,
                    timers,
                    default_windows: &self.config.default_sync_windows,
                    now,
                },
                &layer,
                &repository,
            )
            .await;

        let state = decision.state.name();
        let history_limit = self.config.run_history_limit;
        modify_layer(store, namespace, name, |current| {
            current.status.state = state.to_string();
            current.status.set_conditions(evaluation.diagnostics.clone());
            if let Some(run) = &outcome.run {
                current
                    .status
                    .record_run(LayerRun::from_run(run), history_limit);
            }
        })
        .await?;

        Ok(Some(outcome.requeue_after))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::conditions::IS_SYNC_SCHEDULED;
    use crate::resource::{
        Layer, LayerSpec, ManualSyncStatus, Repository, ResourceKind, ResourceRef, RunState,
        StoreObject,
    };
    use crate::store::InMemoryStore;

    async fn setup(values: &[(&str, &str)]) -> (Arc<InMemoryStore>, Reconciler) {
        let store = Arc::new(InMemoryStore::new());
        let mut layer = Layer::new(
            ResourceKind::Layer,
            "infra",
            "network",
            LayerSpec {
                repository: ResourceRef::new("", "platform"),
                branch: "main".into(),
                path: "network".into(),
                ..Default::default()
            },
        );
        for (key, value) in values {
            layer
                .metadata
                .annotations
                .insert(key.to_string(), value.to_string());
        }
        store.apply(layer.into_any()).await.unwrap();
        let repo = Repository::new(ResourceKind::Repository, "infra", "platform", Default::default());
        store.apply(repo.into_any()).await.unwrap();

        let reconciler = Reconciler::new(
            store.clone(),
            ControllerConfig::default(),
            EventRecorder::default(),
        );
        (store, reconciler)
    }

    #[tokio::test]
    async fn test_new_commit_creates_plan_run() {
        let (store, reconciler) =
            setup(&[(annotations::LAST_RELEVANT_COMMIT, "abc123")]).await;

        let requeue = reconciler.reconcile("infra", "network").await.unwrap();
        assert_eq!(requeue, Some(Duration::from_secs(60)));

        let layer = store.get_layer("infra", "network").await.unwrap();
        assert_eq!(layer.status.state, "PlanNeeded");
        assert_eq!(layer.status.conditions.len(), 8);
        assert_eq!(layer.status.latest_runs.len(), 1);

        let runs = store.list_runs().await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status.state, RunState::Pending);
        assert_eq!(layer.status.last_run.as_ref().unwrap().name, runs[0].name());

        // The pending run keeps the layer idle
        let requeue = reconciler.reconcile("infra", "network").await.unwrap();
        assert_eq!(requeue, Some(Duration::from_secs(1200)));
        let layer = store.get_layer("infra", "network").await.unwrap();
        assert_eq!(layer.status.state, "Idle");
        assert_eq!(store.list_runs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sync_request_is_consumed_once() {
        let (store, reconciler) = setup(&[
            (annotations::LAST_RELEVANT_COMMIT, "abc123"),
            (annotations::SYNC_NOW, "1"),
        ])
        .await;

        reconciler.reconcile("infra", "network").await.unwrap();

        let layer = store.get_layer("infra", "network").await.unwrap();
        assert_eq!(layer.annotation(annotations::SYNC_NOW), None);
        assert!(layer.status.condition(IS_SYNC_SCHEDULED).unwrap().is_true());
        assert_eq!(layer.manual_sync_status(), ManualSyncStatus::Pending);

        reconciler.reconcile("infra", "network").await.unwrap();
        let layer = store.get_layer("infra", "network").await.unwrap();
        assert_eq!(layer.manual_sync_status(), ManualSyncStatus::None);
        assert_eq!(store.list_runs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_layer_stops() {
        let (_, reconciler) = setup(&[]).await;
        assert_eq!(reconciler.reconcile("infra", "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_repository_retries_on_error() {
        let (store, reconciler) = setup(&[]).await;
        store
            .delete(ResourceKind::Repository, "infra", "platform")
            .await
            .unwrap();

        let requeue = reconciler.reconcile("infra", "network").await.unwrap();
        assert_eq!(requeue, Some(Duration::from_secs(60)));
        assert!(store.list_runs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_commit_does_not_advance() {
        let (store, reconciler) = setup(&[]).await;

        let requeue = reconciler.reconcile("infra", "network").await.unwrap();
        assert_eq!(requeue, Some(Duration::from_secs(60)));

        let layer = store.get_layer("infra", "network").await.unwrap();
        assert_eq!(layer.status.state, "PlanNeeded");
        assert!(layer.status.last_run.is_none());
    }
}
