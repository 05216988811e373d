//! Write path used by runners to report progress and results.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::annotations;
use crate::resource::{Action, Layer, Run, RunState};
use crate::store::{modify_layer, ResourceStore, StoreError};

#[derive(Error, Debug)]
pub enum RunReportError {
    #[error("Run {run} is already {state} and cannot change")]
    TerminalState { run: String, state: RunState },

    #[error("Run {run} cannot move from {from} to {to}")]
    InvalidTransition {
        run: String,
        from: RunState,
        to: RunState,
    },

    #[error("Successful plan of run {run} must report a checksum")]
    MissingChecksum { run: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A state change reported by a runner.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub state: RunState,
    /// Plan checksum, required when a plan succeeds.
    #[serde(default)]
    pub checksum: Option<String>,
    /// Summary line shown as the layer's last result.
    #[serde(default)]
    pub result: Option<String>,
}

/// Records a run state change and, on terminal states, the resulting facts
/// on the owning layer.
pub async fn report_run_result(
    store: &dyn ResourceStore,
    namespace: &str,
    name: &str,
    report: RunReport,
) -> Result<Run, RunReportError> {
    let mut run = store.get_run(namespace, name).await?;
    let from = run.status.state;

    if from.is_terminal() {
        return Err(RunReportError::TerminalState {
            run: run.key(),
            state: from,
        });
    }
    if !from.can_transition_to(report.state) {
        return Err(RunReportError::InvalidTransition {
            run: run.key(),
            from,
            to: report.state,
        });
    }

    let checksum = report.checksum.filter(|sum| !sum.is_empty());
    if run.spec.action == Action::Plan && report.state == RunState::Succeeded && checksum.is_none()
    {
        return Err(RunReportError::MissingChecksum { run: run.key() });
    }

    if report.state == RunState::Running {
        run.status.retries += u32::from(from == RunState::Running);
    }
    run.status.state = report.state;
    let run = store.update_run(run).await?;
    log::info!("Run {} moved from {} to {}", run.key(), from, run.status.state);

    if run.status.state.is_terminal() {
        let layer_ns = run.spec.layer.namespace_or(run.namespace()).to_string();
        let now = Utc::now();
        modify_layer(store, &layer_ns, &run.spec.layer.name, |layer| {
            record_outcome(layer, &run, checksum.as_deref(), report.result.as_deref(), now);
        })
        .await?;
    }

    Ok(run)
}

fn record_outcome(
    layer: &mut Layer,
    run: &Run,
    checksum: Option<&str>,
    result: Option<&str>,
    now: DateTime<Utc>,
) {
    let a = &mut layer.metadata.annotations;
    let succeeded = run.status.state == RunState::Succeeded;
    match (run.spec.action, succeeded) {
        (Action::Plan, true) => {
            a.insert(
                annotations::LAST_PLAN_SUM.to_string(),
                checksum.unwrap_or_default().to_string(),
            );
            a.insert(annotations::LAST_PLAN_DATE.to_string(), now.to_rfc3339());
            a.insert(
                annotations::LAST_PLAN_COMMIT.to_string(),
                run.spec.revision.clone(),
            );
        }
        (Action::Plan, false) => {
            a.insert(annotations::LAST_PLAN_SUM.to_string(), String::new());
        }
        (Action::Apply, true) => {
            let planned = a.get(annotations::LAST_PLAN_SUM).cloned().unwrap_or_default();
            a.insert(annotations::LAST_APPLY_SUM.to_string(), planned);
            a.insert(annotations::LAST_APPLY_DATE.to_string(), now.to_rfc3339());
            a.insert(
                annotations::LAST_APPLY_COMMIT.to_string(),
                run.spec.revision.clone(),
            );
        }
        (Action::Apply, false) => {}
    }

    layer.status.last_result = match result {
        Some(text) => text.to_string(),
        None => format!("{} {}", run.spec.action.title(), run.status.state.to_string().to_lowercase()),
    };
}
