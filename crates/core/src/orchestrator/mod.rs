//! Job orchestrator.
//!
//! Drives crack jobs from submission to a terminal status:
//! - **Dispatch**: one task message per part, published without holding job locks
//! - **Results**: merged per job under a per-job lock, persisted after every change
//! - **Deadline**: jobs still in progress after the timeout become partial or failed
//! - **Recovery**: unfinished jobs are reloaded and their missing parts republished

mod config;
mod runner;
mod timers;
mod types;

pub use config::OrchestratorConfig;
pub use runner::JobOrchestrator;
pub use types::{
    JobProgress, OrchestratorError, OrchestratorSummary, RecoveryReport, ResultOutcome,
};
