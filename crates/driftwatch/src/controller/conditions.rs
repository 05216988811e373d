//! The facts the decision engine reasons about.
//!
//! Each fact is computed independently from the layer, its repository and
//! its runs, and is also reported as a status condition on the layer.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::annotations;
use crate::resource::{
    max_retries, Action, Condition, ConditionStatus, Layer, Repository, Run, RunState,
};

pub const IS_RUNNING: &str = "IsRunning";
pub const IS_LAST_PLAN_TOO_OLD: &str = "IsLastPlanTooOld";
pub const IS_LAST_RELEVANT_COMMIT_PLANNED: &str = "IsLastRelevantCommitPlanned";
pub const HAS_LAST_PLAN_FAILED: &str = "HasLastPlanFailed";
pub const IS_APPLY_UP_TO_DATE: &str = "IsApplyUpToDate";
pub const IS_SYNC_SCHEDULED: &str = "IsSyncScheduled";
pub const HAS_LAST_RUN_REACHED_RETRY_LIMIT: &str = "HasLastRunReachedRetryLimit";
pub const IS_APPLY_SCHEDULED: &str = "IsApplyScheduled";

/// Failure streak of the most recent action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryInfo {
    /// Action of the newest run, if there is any run.
    pub action: Option<Action>,
    /// Consecutive failures of `action` since its last success.
    pub failures: u32,
    pub reached_limit: bool,
}

impl RetryInfo {
    /// Computes the streak from runs ordered newest first.
    pub fn from_runs(runs: &[Run], max_retries: u32) -> Self {
        let Some(action) = runs.first().map(|run| run.spec.action) else {
            return Self::default();
        };

        let mut failures = 0;
        for run in runs.iter().take_while(|run| run.spec.action == action) {
            match run.status.state {
                RunState::Failed => failures += 1,
                RunState::Succeeded => break,
                RunState::Pending | RunState::Running => {}
            }
        }

        Self {
            action: Some(action),
            failures,
            reached_limit: failures > 0 && failures >= max_retries,
        }
    }

    fn exhausted(&self, action: Action) -> bool {
        self.reached_limit && self.action == Some(action)
    }
}

/// The eight facts about a layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Conditions {
    pub is_running: bool,
    pub is_last_plan_too_old: bool,
    pub is_last_relevant_commit_planned: bool,
    pub has_last_plan_failed: bool,
    pub is_apply_up_to_date: bool,
    pub is_sync_scheduled: bool,
    pub retry: RetryInfo,
    pub is_apply_scheduled: bool,
}

impl Conditions {
    /// Returns true if failed plans reached the retry limit.
    pub fn plan_retries_exhausted(&self) -> bool {
        self.retry.exhausted(Action::Plan)
    }

    /// Returns true if failed applies reached the retry limit.
    pub fn apply_retries_exhausted(&self) -> bool {
        self.retry.exhausted(Action::Apply)
    }
}

/// Everything the evaluator looks at for one layer.
pub struct LayerContext<'a> {
    pub layer: &'a Layer,
    pub repository: &'a Repository,
    /// The run named by `status.lastRun`, if it still exists.
    pub last_run: Option<&'a Run>,
    /// Runs of the layer, newest first.
    pub runs: &'a [Run],
}

/// Evaluated facts plus one diagnostic condition per fact.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub conditions: Conditions,
    pub diagnostics: Vec<Condition>,
}

#[derive(Debug, Clone)]
pub struct ConditionEvaluator {
    drift_detection: Duration,
    default_max_retries: u32,
}

impl ConditionEvaluator {
    /// Creates an evaluator with the controller-wide drift interval and retry limit.
    pub fn new(drift_detection: Duration, default_max_retries: u32) -> Self {
        Self {
            drift_detection,
            default_max_retries,
        }
    }

    /// Computes the facts about a layer at `now`.
    pub fn evaluate(&self, ctx: &LayerContext<'_>, now: DateTime<Utc>) -> Evaluation {
        let layer = ctx.layer;
        let mut diagnostics = Vec::with_capacity(8);
        let mut push = |condition_type: &str, value: bool, reason: &str, message: String| {
            diagnostics.push(Condition::new(
                condition_type,
                ConditionStatus::from(value),
                reason,
                message,
                now,
            ));
            value
        };

        let is_running = match (&layer.status.last_run, ctx.last_run) {
            (None, _) => push(IS_RUNNING, false, "NoRun", "Layer has no run yet".into()),
            (Some(reference), None) => push(
                IS_RUNNING,
                false,
                "RunNotFound",
                format!("Last run {} no longer exists", reference.name),
            ),
            (Some(_), Some(run)) if run.status.state.is_terminal() => push(
                IS_RUNNING,
                false,
                "RunFinished",
                format!("Run {} is {}", run.name(), run.status.state),
            ),
            (Some(_), Some(run)) => push(
                IS_RUNNING,
                true,
                "RunInProgress",
                format!("Run {} is {}", run.name(), run.status.state),
            ),
        };

        let plan_date = layer
            .annotation(annotations::LAST_PLAN_DATE)
            .and_then(|date| DateTime::parse_from_rfc3339(date).ok())
            .map(|date| date.with_timezone(&Utc));
        let is_last_plan_too_old = match plan_date {
            None => push(
                IS_LAST_PLAN_TOO_OLD,
                true,
                "NoPlanDate",
                "No valid date recorded for the last plan".into(),
            ),
            Some(date) => {
                let too_old = (now - date)
                    .to_std()
                    .map(|elapsed| elapsed > self.drift_detection)
                    .unwrap_or(false);
                let (reason, adverb) = if too_old {
                    ("PlanTooOld", "more")
                } else {
                    ("PlanRecent", "less")
                };
                push(
                    IS_LAST_PLAN_TOO_OLD,
                    too_old,
                    reason,
                    format!(
                        "Last plan ran {} than {}s ago",
                        adverb,
                        self.drift_detection.as_secs()
                    ),
                )
            }
        };

        let plan_commit = layer.annotation(annotations::LAST_PLAN_COMMIT);
        let relevant_commit = layer.annotation(annotations::LAST_RELEVANT_COMMIT);
        let is_last_relevant_commit_planned = match (plan_commit, relevant_commit) {
            (None, _) => push(
                IS_LAST_RELEVANT_COMMIT_PLANNED,
                false,
                "NoPlanCommit",
                "No commit recorded for the last plan".into(),
            ),
            (Some(_), None) => push(
                IS_LAST_RELEVANT_COMMIT_PLANNED,
                true,
                "NoRelevantCommit",
                "No relevant commit recorded for the layer".into(),
            ),
            (Some(planned), Some(relevant)) if planned == relevant => push(
                IS_LAST_RELEVANT_COMMIT_PLANNED,
                true,
                "CommitPlanned",
                format!("Commit {} has been planned", relevant),
            ),
            (Some(planned), Some(relevant)) => push(
                IS_LAST_RELEVANT_COMMIT_PLANNED,
                false,
                "CommitNotPlanned",
                format!("Last plan ran at {}, relevant commit is {}", planned, relevant),
            ),
        };

        let plan_sum = layer.annotation(annotations::LAST_PLAN_SUM);
        let has_last_plan_failed = match plan_sum {
            None => push(
                HAS_LAST_PLAN_FAILED,
                false,
                "NoPlan",
                "No plan has run yet".into(),
            ),
            Some("") => push(
                HAS_LAST_PLAN_FAILED,
                true,
                "PlanFailed",
                "Last plan failed".into(),
            ),
            Some(_) => push(
                HAS_LAST_PLAN_FAILED,
                false,
                "PlanSucceeded",
                "Last plan succeeded".into(),
            ),
        };

        let apply_sum = layer.annotation(annotations::LAST_APPLY_SUM);
        let is_apply_up_to_date = match (plan_sum, apply_sum) {
            (None, _) => push(
                IS_APPLY_UP_TO_DATE,
                true,
                "NoPlan",
                "There is no plan to apply".into(),
            ),
            (Some(_), None) => push(
                IS_APPLY_UP_TO_DATE,
                false,
                "NeverApplied",
                "The layer has never been applied".into(),
            ),
            (Some(planned), Some(applied)) if planned == applied => push(
                IS_APPLY_UP_TO_DATE,
                true,
                "ApplyUpToDate",
                "Last plan has been applied".into(),
            ),
            (Some(_), Some(_)) => push(
                IS_APPLY_UP_TO_DATE,
                false,
                "ApplyOutdated",
                "Last plan has not been applied".into(),
            ),
        };

        let is_sync_scheduled = if layer.annotation(annotations::SYNC_NOW).is_some() {
            push(
                IS_SYNC_SCHEDULED,
                true,
                "SyncScheduled",
                "A sync was requested".into(),
            )
        } else {
            push(
                IS_SYNC_SCHEDULED,
                false,
                "NoSyncScheduled",
                "No sync requested".into(),
            )
        };

        let limit = max_retries(ctx.repository, layer, self.default_max_retries);
        let retry = RetryInfo::from_runs(ctx.runs, limit);
        match retry.action {
            None => push(
                HAS_LAST_RUN_REACHED_RETRY_LIMIT,
                false,
                "NoRun",
                "Layer has no run yet".into(),
            ),
            Some(action) => push(
                HAS_LAST_RUN_REACHED_RETRY_LIMIT,
                retry.reached_limit,
                if retry.reached_limit {
                    "RetryLimitReached"
                } else {
                    "RetryLimitNotReached"
                },
                format!(
                    "{} failed {} consecutive times (limit {})",
                    action.title(),
                    retry.failures,
                    limit
                ),
            ),
        };

        let is_apply_scheduled = if layer.annotation(annotations::APPLY_NOW).is_some() {
            push(
                IS_APPLY_SCHEDULED,
                true,
                "ApplyScheduled",
                "An apply was requested".into(),
            )
        } else {
            push(
                IS_APPLY_SCHEDULED,
                false,
                "NoApplyScheduled",
                "No apply requested".into(),
            )
        };

        Evaluation {
            conditions: Conditions {
                is_running,
                is_last_plan_too_old,
                is_last_relevant_commit_planned,
                has_last_plan_failed,
                is_apply_up_to_date,
                is_sync_scheduled,
                retry,
                is_apply_scheduled,
            },
            diagnostics,
        }
    }
}
