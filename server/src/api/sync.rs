//! Manual sync and apply requests.
//!
//! Both only set an annotation; the controller picks it up on its next
//! reconciliation.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::Json;
use driftwatch::annotations;
use driftwatch::resource::ManualSyncStatus;

use super::{ApiError, StatusResponse};
use crate::state::AppState;

fn is_in_flight(status: ManualSyncStatus) -> bool {
    matches!(
        status,
        ManualSyncStatus::Annotated | ManualSyncStatus::Pending
    )
}

/// `POST /api/layers/{namespace}/{layer}/sync`
pub async fn sync_layer(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<StatusResponse>, ApiError> {
    let layer = state
        .store
        .get_layer(&namespace, &name)
        .await
        .map_err(|e| ApiError::from_store(e, "Layer"))?;

    if is_in_flight(layer.manual_sync_status()) {
        return Err(ApiError::Conflict("Layer sync already triggered".into()));
    }

    annotations::add(
        state.store.as_ref(),
        &layer,
        HashMap::from([(annotations::SYNC_NOW.to_string(), "true".to_string())]),
    )
    .await
    .map_err(|e| ApiError::from_store(e, "Layer"))?;

    log::info!("Manual sync requested for layer {}", layer.key());
    Ok(Json(StatusResponse {
        status: "Layer sync triggered",
    }))
}

/// `POST /api/layers/{namespace}/{layer}/apply`
pub async fn apply_layer(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<StatusResponse>, ApiError> {
    let layer = state
        .store
        .get_layer(&namespace, &name)
        .await
        .map_err(|e| ApiError::from_store(e, "Layer"))?;

    if layer.is_managed() {
        return Err(ApiError::Conflict(
            "Manual apply is not allowed on layers managed by another controller".into(),
        ));
    }
    if is_in_flight(layer.manual_operation_status()) {
        return Err(ApiError::Conflict(
            "A manual operation is already triggered for this layer".into(),
        ));
    }

    annotations::add(
        state.store.as_ref(),
        &layer,
        HashMap::from([(annotations::APPLY_NOW.to_string(), "true".to_string())]),
    )
    .await
    .map_err(|e| ApiError::from_store(e, "Layer"))?;

    log::info!("Manual apply requested for layer {}", layer.key());
    Ok(Json(StatusResponse {
        status: "Layer apply triggered",
    }))
}
