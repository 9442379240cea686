//! Core job data types.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::{Alphabet, EngineError, SearchSpace};

/// Lifecycle status of a job.
///
/// ```text
/// Created -> InProgress -> Ready            (all parts reported)
///                |-------> PartiallyReady   (timed out, some parts reported)
///                '-------> Error            (timed out, no parts reported)
/// ```
///
/// `Ready`, `PartiallyReady` and `Error` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Created,
    InProgress,
    PartiallyReady,
    Ready,
    Error,
}

impl JobStatus {
    /// Returns true if no further status transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::PartiallyReady | JobStatus::Ready | JobStatus::Error
        )
    }

    /// Statuses that recovery picks up after a restart.
    pub fn unfinished() -> &'static [JobStatus] {
        &[
            JobStatus::Created,
            JobStatus::InProgress,
            JobStatus::PartiallyReady,
        ]
    }

    /// Wire/storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "CREATED",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::PartiallyReady => "PARTIALLY_READY",
            JobStatus::Ready => "READY",
            JobStatus::Error => "ERROR",
        }
    }

    /// Parse a wire/storage name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREATED" => Some(JobStatus::Created),
            "IN_PROGRESS" => Some(JobStatus::InProgress),
            "PARTIALLY_READY" => Some(JobStatus::PartiallyReady),
            "READY" => Some(JobStatus::Ready),
            "ERROR" => Some(JobStatus::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened when a part result was applied to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartOutcome {
    /// The part was new; matches merged and the part marked complete.
    Merged {
        /// Whether this result moved the job to `Ready`.
        became_ready: bool,
    },
    /// The part had already reported; nothing changed.
    Duplicate,
    /// The part number is not below the job's part count.
    OutOfRange,
}

/// A crack request tracked through its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    /// Unique identifier (UUID).
    pub id: String,

    /// Lowercase hex digest being searched for.
    pub target_digest: String,

    /// Longest candidate length searched.
    pub max_length: u32,

    /// Symbols candidates are built from.
    pub alphabet: Alphabet,

    /// Number of parts the space was split into, fixed at submission.
    pub part_count: u32,

    /// Current status.
    pub status: JobStatus,

    /// Candidates found so far.
    pub matches: BTreeSet<String>,

    /// Parts that have reported a result.
    pub completed_parts: BTreeSet<u32>,

    pub created_at: DateTime<Utc>,

    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a job in `Created` status with a fresh identifier.
    pub fn new(
        target_digest: impl Into<String>,
        max_length: u32,
        alphabet: Alphabet,
        part_count: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            target_digest: target_digest.into(),
            max_length,
            alphabet,
            part_count,
            status: JobStatus::Created,
            matches: BTreeSet::new(),
            completed_parts: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Search space this job covers.
    pub fn space(&self) -> Result<SearchSpace, EngineError> {
        SearchSpace::new(self.alphabet.clone(), self.max_length)
    }

    /// Move a `Created` job to `InProgress`. Returns true if the status changed.
    pub fn begin(&mut self) -> bool {
        if self.status != JobStatus::Created {
            return false;
        }
        self.status = JobStatus::InProgress;
        self.touch();
        true
    }

    /// Apply a part result.
    ///
    /// Late results on a terminal job are still merged, but never change its
    /// status.
    pub fn record_part(&mut self, part_number: u32, matches: Vec<String>) -> PartOutcome {
        if part_number >= self.part_count {
            return PartOutcome::OutOfRange;
        }
        if !self.completed_parts.insert(part_number) {
            return PartOutcome::Duplicate;
        }

        self.matches.extend(matches);

        let became_ready = self.status == JobStatus::InProgress && self.is_complete();
        if became_ready {
            self.status = JobStatus::Ready;
        }
        self.touch();

        PartOutcome::Merged { became_ready }
    }

    /// Apply the deadline. Only an `InProgress` job transitions: to
    /// `PartiallyReady` if any part reported, otherwise to `Error`.
    /// Returns the new status if a transition happened.
    pub fn time_out(&mut self) -> Option<JobStatus> {
        if self.status != JobStatus::InProgress {
            return None;
        }
        self.status = if self.completed_parts.is_empty() {
            JobStatus::Error
        } else {
            JobStatus::PartiallyReady
        };
        self.touch();
        Some(self.status)
    }

    /// Returns true if every part has reported.
    pub fn is_complete(&self) -> bool {
        self.completed_parts.len() as u32 == self.part_count
    }

    /// Parts that have not reported yet, in order.
    pub fn pending_parts(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.part_count).filter(|p| !self.completed_parts.contains(p))
    }

    /// `floor(100 * completed / part_count)`.
    pub fn progress_percent(&self) -> u8 {
        if self.part_count == 0 {
            return 0;
        }
        (self.completed_parts.len() as u64 * 100 / self.part_count as u64) as u8
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(part_count: u32) -> Job {
        let mut job = Job::new(
            "187ef4436122d1cc2f40dc2b92f0eba0",
            2,
            Alphabet::from_chars("ab").unwrap(),
            part_count,
        );
        job.begin();
        job
    }

    #[test]
    fn test_new_job_is_created() {
        let job = Job::new("abc", 2, Alphabet::default(), 3);
        assert_eq!(job.status, JobStatus::Created);
        assert!(!job.id.is_empty());
        assert!(job.matches.is_empty());
        assert!(job.completed_parts.is_empty());
    }

    #[test]
    fn test_begin_only_from_created() {
        let mut job = Job::new("abc", 2, Alphabet::default(), 3);
        assert!(job.begin());
        assert_eq!(job.status, JobStatus::InProgress);
        assert!(!job.begin());
    }

    #[test]
    fn test_all_parts_make_ready() {
        let mut job = job(2);
        assert_eq!(
            job.record_part(1, vec!["ab".into()]),
            PartOutcome::Merged { became_ready: false }
        );
        assert_eq!(job.status, JobStatus::InProgress);
        assert_eq!(job.progress_percent(), 50);

        assert_eq!(
            job.record_part(0, vec![]),
            PartOutcome::Merged { became_ready: true }
        );
        assert_eq!(job.status, JobStatus::Ready);
        assert_eq!(job.progress_percent(), 100);
        assert_eq!(job.matches.iter().collect::<Vec<_>>(), vec!["ab"]);
    }

    #[test]
    fn test_duplicate_part_is_noop() {
        let mut job = job(2);
        job.record_part(0, vec!["ab".into()]);
        let before = job.clone();

        assert_eq!(
            job.record_part(0, vec!["zz".into()]),
            PartOutcome::Duplicate
        );
        assert_eq!(job, before);
    }

    #[test]
    fn test_out_of_range_part() {
        let mut job = job(2);
        assert_eq!(job.record_part(2, vec![]), PartOutcome::OutOfRange);
        assert!(job.completed_parts.is_empty());
    }

    #[test]
    fn test_matches_are_deduplicated() {
        let mut job = job(3);
        job.record_part(0, vec!["ab".into(), "ab".into()]);
        job.record_part(1, vec!["ab".into()]);
        assert_eq!(job.matches.len(), 1);
    }

    #[test]
    fn test_timeout_without_results_is_error() {
        let mut job = job(2);
        assert_eq!(job.time_out(), Some(JobStatus::Error));
        assert_eq!(job.status, JobStatus::Error);
    }

    #[test]
    fn test_timeout_with_some_results_is_partial() {
        let mut job = job(2);
        job.record_part(0, vec![]);
        assert_eq!(job.time_out(), Some(JobStatus::PartiallyReady));
    }

    #[test]
    fn test_timeout_after_ready_is_ignored() {
        let mut job = job(1);
        job.record_part(0, vec![]);
        assert_eq!(job.status, JobStatus::Ready);
        assert_eq!(job.time_out(), None);
        assert_eq!(job.status, JobStatus::Ready);
    }

    #[test]
    fn test_late_result_after_timeout_keeps_status() {
        let mut job = job(2);
        job.record_part(0, vec![]);
        job.time_out();

        let outcome = job.record_part(1, vec!["ab".into()]);
        assert_eq!(outcome, PartOutcome::Merged { became_ready: false });
        assert_eq!(job.status, JobStatus::PartiallyReady);
        assert!(job.matches.contains("ab"));
        assert_eq!(job.progress_percent(), 100);
    }

    #[test]
    fn test_pending_parts() {
        let mut job = job(3);
        job.record_part(0, vec![]);
        job.record_part(2, vec![]);
        assert_eq!(job.pending_parts().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_progress_floors() {
        let mut job = job(3);
        job.record_part(0, vec![]);
        assert_eq!(job.progress_percent(), 33);
        job.record_part(1, vec![]);
        assert_eq!(job.progress_percent(), 66);
    }

    #[test]
    fn test_status_names() {
        for status in [
            JobStatus::Created,
            JobStatus::InProgress,
            JobStatus::PartiallyReady,
            JobStatus::Ready,
            JobStatus::Error,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        assert_eq!(JobStatus::parse("pending"), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Created.is_terminal());
        assert!(!JobStatus::InProgress.is_terminal());
        assert!(JobStatus::PartiallyReady.is_terminal());
        assert!(JobStatus::Ready.is_terminal());
        assert!(JobStatus::Error.is_terminal());
    }
}
