//! Run state reporting.

use axum::extract::{Path, State};
use axum::Json;
use driftwatch::controller::{report_run_result, RunReport, RunReportError};
use driftwatch::resource::Run;

use super::ApiError;
use crate::state::AppState;

/// `POST /api/runs/{namespace}/{run}/status`
pub async fn report_run(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    Json(report): Json<RunReport>,
) -> Result<Json<Run>, ApiError> {
    let run = report_run_result(state.store.as_ref(), &namespace, &name, report)
        .await
        .map_err(|e| match e {
            RunReportError::Store(err) => ApiError::from_store(err, "Run"),
            RunReportError::MissingChecksum { .. } => ApiError::BadRequest(e.to_string()),
            RunReportError::TerminalState { .. } | RunReportError::InvalidTransition { .. } => {
                ApiError::Conflict(e.to_string())
            }
        })?;
    Ok(Json(run))
}
