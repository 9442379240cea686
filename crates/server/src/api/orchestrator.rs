//! Orchestrator API handlers.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::state::AppState;

// ============================================================================
// Response Types
// ============================================================================

/// Orchestrator status response
#[derive(Debug, Serialize)]
pub struct OrchestratorStatusResponse {
    /// Whether this process runs an orchestrator
    pub available: bool,
    /// Whether the orchestrator is currently running
    pub running: bool,
    /// Part count given to new jobs
    pub worker_count: u32,
    /// Jobs held in memory
    pub resident_jobs: usize,
    /// Jobs waiting on their deadline
    pub armed_timers: usize,
    pub created_count: usize,
    pub in_progress_count: usize,
    pub partially_ready_count: usize,
    pub ready_count: usize,
    pub error_count: usize,
}

/// Request to change the part count of future jobs
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerCountRequest {
    pub worker_count: u32,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct OrchestratorErrorResponse {
    pub error: String,
}

/// Simple message response
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get orchestrator status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<OrchestratorStatusResponse> {
    match state.orchestrator() {
        Some(orch) => {
            let summary = orch.summary().await;
            Json(OrchestratorStatusResponse {
                available: true,
                running: summary.running,
                worker_count: summary.worker_count,
                resident_jobs: summary.resident_jobs,
                armed_timers: summary.armed_timers,
                created_count: summary.created_count,
                in_progress_count: summary.in_progress_count,
                partially_ready_count: summary.partially_ready_count,
                ready_count: summary.ready_count,
                error_count: summary.error_count,
            })
        }
        None => Json(OrchestratorStatusResponse {
            available: false,
            running: false,
            worker_count: 0,
            resident_jobs: 0,
            armed_timers: 0,
            created_count: 0,
            in_progress_count: 0,
            partially_ready_count: 0,
            ready_count: 0,
            error_count: 0,
        }),
    }
}

/// Change how many parts new jobs are split into
pub async fn set_worker_count(
    State(state): State<Arc<AppState>>,
    Json(request): Json<WorkerCountRequest>,
) -> Result<Json<MessageResponse>, impl IntoResponse> {
    let Some(orch) = state.orchestrator() else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(OrchestratorErrorResponse {
                error: "Orchestrator not available in this role".to_string(),
            }),
        ));
    };

    match orch.set_worker_count(request.worker_count) {
        Ok(()) => Ok(Json(MessageResponse {
            message: format!("New jobs will be split into {} parts", request.worker_count),
        })),
        Err(e) => Err((
            StatusCode::BAD_REQUEST,
            Json(OrchestratorErrorResponse {
                error: e.to_string(),
            }),
        )),
    }
}
