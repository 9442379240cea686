//! Types for the job orchestrator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::{Job, JobStatus};

/// Errors that can occur during orchestration.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Submission parameters were rejected before anything was stored.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A result message that can never apply to its job.
    #[error("invalid result: {0}")]
    InvalidResult(String),

    /// Job not found in memory or in the store.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// Job store error.
    #[error("job store error: {0}")]
    Store(#[from] crate::job::JobError),

    /// Search space error.
    #[error("engine error: {0}")]
    Engine(#[from] crate::engine::EngineError),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),
}

/// What `on_result` did with a result message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultOutcome {
    /// New part merged into the job.
    Merged,
    /// Part already reported; state unchanged.
    Duplicate,
    /// No such job; discarded.
    UnknownJob,
}

/// A job's externally visible progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub id: String,
    pub status: JobStatus,
    /// Matches found so far, sorted.
    pub matches: Vec<String>,
    /// `floor(100 * completed parts / part count)`.
    pub progress: u8,
}

impl From<&Job> for JobProgress {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            status: job.status,
            matches: job.matches.iter().cloned().collect(),
            progress: job.progress_percent(),
        }
    }
}

/// Current status of the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorSummary {
    /// Whether the orchestrator is running.
    pub running: bool,
    /// Part count given to new jobs.
    pub worker_count: u32,
    /// Jobs held in memory.
    pub resident_jobs: usize,
    /// Jobs with an armed deadline.
    pub armed_timers: usize,
    pub created_count: usize,
    pub in_progress_count: usize,
    pub partially_ready_count: usize,
    pub ready_count: usize,
    pub error_count: usize,
}

/// What a recovery pass found and republished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Unfinished jobs loaded from the store.
    pub jobs: usize,
    /// Task messages republished for parts without a result.
    pub parts: usize,
}
