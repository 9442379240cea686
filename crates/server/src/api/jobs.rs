//! Crack request API handlers.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

use crackhash_core::{JobProgress, OrchestratorError};

use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Body of a crack request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrackRequest {
    pub hash: String,
    pub max_length: u32,
}

/// Accepted crack request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrackResponse {
    pub request_id: String,
}

/// Query parameters for status lookups.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    pub request_id: Option<String>,
}

/// Status of a crack request.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
    /// Matches found so far, `null` when there are none.
    pub data: Option<Vec<String>>,
    /// Whole percent of parts reported, e.g. `"66%"`.
    pub progress: String,
}

impl From<JobProgress> for StatusResponse {
    fn from(progress: JobProgress) -> Self {
        Self {
            status: progress.status.to_string(),
            data: if progress.matches.is_empty() {
                None
            } else {
                Some(progress.matches)
            },
            progress: format!("{}%", progress.progress),
        }
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// API error type for job handlers.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn unavailable() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "Orchestrator not available in this role",
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::InvalidRequest(msg) => Self::new(StatusCode::BAD_REQUEST, msg),
            OrchestratorError::JobNotFound(id) => {
                Self::new(StatusCode::NOT_FOUND, format!("Request not found: {}", id))
            }
            other => {
                error!("Crack request failed: {}", other);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
            }
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Submit a crack request.
pub async fn crack(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CrackRequest>, JsonRejection>,
) -> Result<Json<CrackResponse>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.body_text()))?;
    let orchestrator = state.orchestrator().ok_or_else(ApiError::unavailable)?;

    let request_id = orchestrator
        .submit(&request.hash, request.max_length)
        .await?;

    Ok(Json(CrackResponse { request_id }))
}

/// Get the status of a crack request.
pub async fn status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<StatusResponse>, ApiError> {
    let request_id = query
        .request_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "requestId is required"))?;
    let orchestrator = state.orchestrator().ok_or_else(ApiError::unavailable)?;

    let progress = orchestrator.status(request_id.trim()).await?;
    Ok(Json(StatusResponse::from(progress)))
}
