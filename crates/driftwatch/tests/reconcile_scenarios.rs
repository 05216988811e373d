//! End-to-end reconciliation scenarios against the in-memory store.

mod common;

use std::time::Duration;

use chrono::Duration as ChronoDuration;

use common::harness::now;
use common::{LayerBuilder, RepositoryBuilder, RunBuilder, TestHarness};
use driftwatch::annotations;
use driftwatch::config::ControllerConfig;
use driftwatch::resource::{Action, RunState, WindowKind};

const WAIT_ACTION: Duration = Duration::from_secs(60);
const DRIFT_DETECTION: Duration = Duration::from_secs(1200);

#[tokio::test]
async fn new_commit_without_plan_creates_plan_run() {
    let mut harness = TestHarness::new();
    harness.add_repository(RepositoryBuilder::new().build()).await;
    harness
        .add_layer(LayerBuilder::new("network").relevant_commit("abc123").build())
        .await;

    let requeue = harness.reconcile("network").await;
    assert_eq!(requeue, Some(WAIT_ACTION));

    let runs = harness.runs("network").await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].spec.action, Action::Plan);
    assert_eq!(runs[0].spec.revision, "abc123");
    assert_eq!(runs[0].status.state, RunState::Pending);

    let layer = harness.layer("network").await;
    assert_eq!(layer.status.state, "PlanNeeded");
    let last_run = layer.status.last_run.as_ref().unwrap();
    assert_eq!(last_run.name, runs[0].metadata.name);
    assert_eq!(layer.status.latest_runs.len(), 1);
    assert!(harness.reasons().contains(&"RunCreated".to_string()));
}

#[tokio::test]
async fn in_flight_run_keeps_layer_idle() {
    let harness = TestHarness::new();
    harness.add_repository(RepositoryBuilder::new().build()).await;
    harness
        .add_layer(LayerBuilder::new("network").relevant_commit("abc123").build())
        .await;

    harness.reconcile("network").await;
    let requeue = harness.reconcile("network").await;

    assert_eq!(requeue, Some(DRIFT_DETECTION));
    assert_eq!(harness.runs("network").await.len(), 1);
    assert_eq!(harness.layer("network").await.status.state, "Idle");
}

#[tokio::test]
async fn apply_inside_deny_window_is_postponed() {
    let mut harness = TestHarness::new();
    harness
        .add_repository(
            RepositoryBuilder::new()
                .auto_apply(true)
                .window(WindowKind::Deny, "09:00", "11:00", &[Action::Apply])
                .build(),
        )
        .await;
    harness
        .add_layer(
            LayerBuilder::new("network")
                .relevant_commit("abc123")
                .planned("sum-1", "abc123", now() - ChronoDuration::minutes(5))
                .build(),
        )
        .await;

    let requeue = harness.reconcile("network").await;

    assert_eq!(requeue, Some(WAIT_ACTION));
    assert!(harness.runs("network").await.is_empty());
    assert_eq!(harness.layer("network").await.status.state, "ApplyNeeded");
    assert!(harness.reasons().contains(&"SyncWindowBlocked".to_string()));
}

#[tokio::test]
async fn apply_outside_deny_window_creates_apply_run() {
    let harness = TestHarness::new();
    harness
        .add_repository(
            RepositoryBuilder::new()
                .auto_apply(true)
                .window(WindowKind::Deny, "22:00", "06:00", &[Action::Apply])
                .build(),
        )
        .await;
    harness
        .add_layer(
            LayerBuilder::new("network")
                .relevant_commit("abc123")
                .planned("sum-1", "abc123", now() - ChronoDuration::minutes(5))
                .build(),
        )
        .await;

    assert_eq!(harness.reconcile("network").await, Some(WAIT_ACTION));
    let runs = harness.runs("network").await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].spec.action, Action::Apply);
}

#[tokio::test]
async fn ready_plan_without_auto_apply_waits() {
    let harness = TestHarness::new();
    harness.add_repository(RepositoryBuilder::new().build()).await;
    harness
        .add_layer(
            LayerBuilder::new("network")
                .relevant_commit("abc123")
                .planned("sum-1", "abc123", now() - ChronoDuration::minutes(5))
                .build(),
        )
        .await;

    assert_eq!(harness.reconcile("network").await, Some(DRIFT_DETECTION));
    assert!(harness.runs("network").await.is_empty());
}

#[tokio::test]
async fn failed_plans_at_retry_limit_stop_planning() {
    let mut harness = TestHarness::new();
    harness
        .add_repository(RepositoryBuilder::new().max_retries(2).build())
        .await;
    let first = harness
        .add_run(
            RunBuilder::new("network-plan-aaaaa", "network", Action::Plan)
                .state(RunState::Failed)
                .created_minutes_ago(now(), 30)
                .build(),
        )
        .await;
    let second = harness
        .add_run(
            RunBuilder::new("network-plan-bbbbb", "network", Action::Plan)
                .state(RunState::Failed)
                .created_minutes_ago(now(), 10)
                .build(),
        )
        .await;
    assert_ne!(first.metadata.name, second.metadata.name);

    // The last plan is days old, which alone would trigger a plan
    harness
        .add_layer(
            LayerBuilder::new("network")
                .relevant_commit("def456")
                .planned("", "abc123", now() - ChronoDuration::days(3))
                .last_run(&second)
                .build(),
        )
        .await;

    let requeue = harness.reconcile("network").await;

    assert_eq!(requeue, Some(DRIFT_DETECTION));
    assert_eq!(harness.runs("network").await.len(), 2);
    assert_eq!(
        harness.layer("network").await.status.state,
        "MaxRetriesReached"
    );
    assert!(harness.reasons().contains(&"MaxRetriesReached".to_string()));

    // Sticky until the run history changes
    assert_eq!(harness.reconcile("network").await, Some(DRIFT_DETECTION));
    assert_eq!(harness.runs("network").await.len(), 2);
}

#[tokio::test]
async fn sync_request_is_consumed_exactly_once() {
    let harness = TestHarness::new();
    harness.add_repository(RepositoryBuilder::new().build()).await;
    harness
        .add_layer(
            LayerBuilder::new("network")
                .relevant_commit("abc123")
                .planned("sum-1", "abc123", now() - ChronoDuration::minutes(5))
                .applied("sum-1")
                .annotation(annotations::SYNC_NOW, "true")
                .build(),
        )
        .await;

    harness.reconcile("network").await;
    let layer = harness.layer("network").await;
    assert_eq!(layer.annotation(annotations::SYNC_NOW), None);
    assert_eq!(harness.runs("network").await.len(), 1);

    // The plan run is still pending, so nothing new is started
    harness.reconcile("network").await;
    assert_eq!(harness.runs("network").await.len(), 1);
}

#[tokio::test]
async fn apply_request_is_consumed_exactly_once() {
    let mut harness = TestHarness::new();
    // Auto-apply stays disabled; only the request can start the apply
    harness.add_repository(RepositoryBuilder::new().build()).await;
    harness
        .add_layer(
            LayerBuilder::new("network")
                .relevant_commit("abc123")
                .planned("sum-1", "abc123", now() - ChronoDuration::minutes(5))
                .annotation(annotations::APPLY_NOW, "true")
                .build(),
        )
        .await;

    let delay = harness.reconcile("network").await;
    assert_eq!(delay, Some(WAIT_ACTION));
    let layer = harness.layer("network").await;
    assert_eq!(layer.annotation(annotations::APPLY_NOW), None);
    assert_eq!(layer.status.state, "ApplyNeeded");

    let runs = harness.runs("network").await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].spec.action, Action::Apply);
    assert_eq!(runs[0].spec.revision, "abc123");
    assert!(harness.reasons().contains(&"RunCreated".to_string()));

    // The apply run is still pending, so nothing new is started
    let delay = harness.reconcile("network").await;
    assert_eq!(delay, Some(DRIFT_DETECTION));
    assert_eq!(harness.runs("network").await.len(), 1);
    assert_eq!(harness.layer("network").await.status.state, "Idle");
}

#[tokio::test]
async fn default_windows_apply_to_every_repository() {
    let mut config = ControllerConfig::default();
    config.default_sync_windows = vec![driftwatch::resource::SyncWindow {
        kind: WindowKind::Allow,
        days: vec![],
        start: "20:00".into(),
        end: "23:00".into(),
        layers: vec!["net*".into()],
        actions: vec![],
    }];
    let harness = TestHarness::with_config(config);
    harness.add_repository(RepositoryBuilder::new().build()).await;
    harness
        .add_layer(LayerBuilder::new("network").relevant_commit("abc123").build())
        .await;
    harness
        .add_layer(LayerBuilder::new("dns").relevant_commit("abc123").build())
        .await;

    assert_eq!(harness.reconcile("network").await, Some(WAIT_ACTION));
    assert!(harness.runs("network").await.is_empty());

    assert_eq!(harness.reconcile("dns").await, Some(WAIT_ACTION));
    assert_eq!(harness.runs("dns").await.len(), 1);
}

#[tokio::test]
async fn deleted_layer_stops_reconciliation() {
    let harness = TestHarness::new();
    assert_eq!(harness.reconcile("missing").await, None);
}
