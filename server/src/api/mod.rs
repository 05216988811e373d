//! HTTP API.
//!
//! Routes are organized by domain:
//! - `layers`: layer snapshot and its event stream
//! - `sync`: manual sync and apply requests
//! - `runs`: run state reporting used by runners
//! - `plans`: plan output retrieval

pub mod layers;
pub mod plans;
pub mod runs;
pub mod sync;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use driftwatch::store::StoreError;
use serde::Serialize;
use thiserror::Error;

use crate::state::AppState;

/// Builds the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/layers", get(layers::list_layers))
        .route("/api/layers/events", get(layers::layer_events))
        .route(
            "/api/layers/{namespace}/{layer}/sync",
            post(sync::sync_layer),
        )
        .route(
            "/api/layers/{namespace}/{layer}/apply",
            post(sync::apply_layer),
        )
        .route("/api/runs/{namespace}/{run}/status", post(runs::report_run))
        .route(
            "/api/plans/{namespace}/{layer}/{run}/{attempt}",
            get(plans::get_plan),
        )
        .with_state(state)
}

/// Body of successful trigger requests.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

/// Errors returned to API clients as `{"error": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Maps a store failure while reading `what`. Internal details are
    /// logged, not returned.
    pub fn from_store(err: StoreError, what: &str) -> Self {
        match err {
            StoreError::NotFound { .. } => Self::NotFound(format!("{} not found", what)),
            StoreError::Conflict { .. } => {
                Self::Conflict(format!("{} was modified concurrently, retry", what))
            }
            other => {
                log::error!("Store error while handling {}: {}", what, other);
                Self::Internal(format!(
                    "An error occurred while accessing the {}",
                    what.to_lowercase()
                ))
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

// ============================================================================
// Tests
// ============================================================================
