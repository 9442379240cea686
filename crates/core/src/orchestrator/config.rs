//! Orchestrator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::Alphabet;

/// Configuration for the job orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Number of parts each new job is split into.
    /// Read once per job at submission; later changes only affect new jobs.
    #[serde(default = "default_worker_count")]
    pub worker_count: u32,

    /// Deadline for a job, counted from submission or recovery (seconds).
    /// An unfinished job becomes PARTIALLY_READY or ERROR when it elapses.
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,

    /// Symbols candidates are built from.
    #[serde(default)]
    pub alphabet: Alphabet,

    /// Largest `maxLength` a submission may ask for.
    #[serde(default = "default_max_length_limit")]
    pub max_length_limit: u32,
}

fn default_worker_count() -> u32 {
    3
}

fn default_job_timeout() -> u64 {
    300 // 5 minutes
}

fn default_max_length_limit() -> u32 {
    8
}

impl OrchestratorConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            job_timeout_secs: default_job_timeout(),
            alphabet: Alphabet::default(),
            max_length_limit: default_max_length_limit(),
        }
    }
}
