//! Messages exchanged between the orchestrator and executors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::{Alphabet, SearchSpace};

/// A task message that cannot be executed. Rejected, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid task: {0}")]
pub struct InvalidTask(pub String);

/// One part of a job, sent to executors.
///
/// The range bounds are fixed when the job is dispatched; executors use them
/// as given and never re-derive them from `part_count`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub job_id: String,
    pub part_number: u32,
    pub part_count: u32,
    pub target_digest: String,
    pub max_length: u32,
    pub alphabet: Alphabet,
    /// First global index of the part (inclusive).
    pub start: u64,
    /// End of the part (exclusive).
    pub end: u64,
}

impl TaskMessage {
    /// Check the task and build the space it enumerates.
    pub fn search_space(&self) -> Result<SearchSpace, InvalidTask> {
        if self.target_digest.is_empty() {
            return Err(InvalidTask("empty target digest".to_string()));
        }
        if self.part_count == 0 {
            return Err(InvalidTask("part count is 0".to_string()));
        }
        if self.part_number >= self.part_count {
            return Err(InvalidTask(format!(
                "part {} out of range for {} parts",
                self.part_number, self.part_count
            )));
        }

        let space = SearchSpace::new(self.alphabet.clone(), self.max_length)
            .map_err(|e| InvalidTask(e.to_string()))?;
        space
            .check_range(self.start, self.end)
            .map_err(|e| InvalidTask(e.to_string()))?;
        Ok(space)
    }
}

/// Matches found by an executor for one part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub job_id: String,
    pub part_number: u32,
    #[serde(default)]
    pub matches: Vec<String>,
}
