//! Plan output retrieval.

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use driftwatch::plans::{PlanFormat, PlanKey, PlanStoreError};
use serde::Deserialize;

use super::ApiError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct PlanQuery {
    #[serde(default)]
    pub format: Option<String>,
}

/// `GET /api/plans/{namespace}/{layer}/{run}/{attempt}?format=pretty|json|short`
pub async fn get_plan(
    State(state): State<AppState>,
    Path((namespace, layer, run, attempt)): Path<(String, String, String, String)>,
    Query(query): Query<PlanQuery>,
) -> Result<Response, ApiError> {
    let format: PlanFormat = query
        .format
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(|e: PlanStoreError| ApiError::BadRequest(e.to_string()))?;

    let key = PlanKey {
        namespace: &namespace,
        layer: &layer,
        run: &run,
        attempt: &attempt,
    };
    let plan = state.plans.get_plan(&key, format).await.map_err(|e| {
        log::error!("Could not read plan for {}/{}/{}: {}", namespace, layer, run, e);
        match e {
            PlanStoreError::InvalidSegment { .. } => {
                ApiError::BadRequest(e.to_string())
            }
            _ => ApiError::Internal("An error occurred while reading the plan".into()),
        }
    })?;

    match plan {
        Some(content) => {
            Ok(([(header::CONTENT_TYPE, format.content_type())], content).into_response())
        }
        None => Err(ApiError::NotFound("Plan not found".into())),
    }
}
