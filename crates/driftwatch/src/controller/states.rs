//! The reconciliation states and what each one does.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::run_factory::build_run;
use super::sync_window::is_sync_blocked;
use crate::annotations;
use crate::broadcast::EventRecorder;
use crate::config::TimersConfig;
use crate::resource::{auto_apply_enabled, Action, Layer, Repository, Run, SyncWindow};
use crate::store::ResourceStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    PlanNeeded,
    ApplyNeeded { is_manual: bool },
    /// Sticky until the failure streak of `action` changes.
    MaxRetriesReached { action: Action },
}

impl State {
    /// Label written to `status.state`.
    pub fn name(&self) -> &'static str {
        match self {
            State::Idle => "Idle",
            State::PlanNeeded => "PlanNeeded",
            State::ApplyNeeded { .. } => "ApplyNeeded",
            State::MaxRetriesReached { .. } => "MaxRetriesReached",
        }
    }

    /// Carries out the side effects of this state.
    pub async fn act(&self, ctx: &ActContext<'_>, layer: &Layer, repository: &Repository) -> Outcome {
        match *self {
            State::Idle => Outcome::requeue(ctx.timers.drift_detection_interval()),
            State::PlanNeeded => ctx.start_run(layer, repository, Action::Plan).await,
            State::ApplyNeeded { is_manual } => {
                if !is_manual && !auto_apply_enabled(repository, layer) {
                    log::debug!("Auto-apply disabled for layer {}, waiting", layer.key());
                    return Outcome::requeue(ctx.timers.drift_detection_interval());
                }
                ctx.start_run(layer, repository, Action::Apply).await
            }
            State::MaxRetriesReached { action } => {
                ctx.recorder.warning(
                    layer,
                    "MaxRetriesReached",
                    format!(
                        "{} has reached its retry limit, manual intervention required",
                        action.title()
                    ),
                );
                Outcome::requeue(ctx.timers.drift_detection_interval())
            }
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of acting on a state.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub requeue_after: Duration,
    /// The run created by this action, if any.
    pub run: Option<Run>,
}

impl Outcome {
    fn requeue(after: Duration) -> Self {
        Self {
            requeue_after: after,
            run: None,
        }
    }
}

/// Collaborators available to state handlers.
pub struct ActContext<'a> {
    pub store: &'a dyn ResourceStore,
    pub recorder: &'a EventRecorder,
    pub timers: &'a TimersConfig,
    /// Windows applied after each repository's own windows.
    pub default_windows: &'a [SyncWindow],
    pub now: DateTime<Utc>,
}

impl ActContext<'_> {
    async fn start_run(&self, layer: &Layer, repository: &Repository, action: Action) -> Outcome {
        let windows: Vec<SyncWindow> = repository
            .spec
            .sync_windows
            .iter()
            .chain(self.default_windows)
            .cloned()
            .collect();
        if let Some(reason) = is_sync_blocked(&windows, action, layer.name(), self.now) {
            self.recorder.normal(
                layer,
                "SyncWindowBlocked",
                format!("{} postponed: {}", action.title(), reason),
            );
            return Outcome::requeue(self.timers.wait_action_interval());
        }

        let Some(revision) = layer.annotation(annotations::LAST_RELEVANT_COMMIT) else {
            self.recorder.warning(
                layer,
                "MissingRelevantCommit",
                format!(
                    "Cannot start {}: annotation {} is not set",
                    action,
                    annotations::LAST_RELEVANT_COMMIT
                ),
            );
            return Outcome::requeue(self.timers.on_error_interval());
        };

        let run = build_run(layer, revision, action);
        match self.store.create_run(run).await {
            Ok(created) => {
                self.recorder.normal(
                    layer,
                    "RunCreated",
                    format!("Created {} run {} at {}", action, created.name(), revision),
                );
                Outcome {
                    requeue_after: self.timers.wait_action_interval(),
                    run: Some(created),
                }
            }
            Err(e) => {
                self.recorder.warning(
                    layer,
                    "RunCreationFailed",
                    format!("Failed to create {} run: {}", action, e),
                );
                Outcome::requeue(self.timers.on_error_interval())
            }
        }
    }
}
