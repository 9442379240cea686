//! Job storage trait and types.

use std::fmt;

use crate::job::{Job, JobStatus};

/// Error type for job storage operations.
#[derive(Debug)]
pub enum JobError {
    /// Job not found.
    NotFound(String),
    /// A job with this id already exists.
    AlreadyExists(String),
    /// Database error.
    Database(String),
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobError::NotFound(id) => write!(f, "Job not found: {}", id),
            JobError::AlreadyExists(id) => write!(f, "Job already exists: {}", id),
            JobError::Database(msg) => write!(f, "Database error: {}", msg),
        }
    }
}

impl std::error::Error for JobError {}

/// Sort order for job listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JobOrder {
    /// Newest first.
    #[default]
    CreatedDesc,
    /// Least recently updated first (recovery order).
    UpdatedAsc,
}

/// Filter for querying jobs.
#[derive(Debug, Clone)]
pub struct JobFilter {
    /// Restrict to these statuses (empty = any).
    pub statuses: Vec<JobStatus>,
    pub order: JobOrder,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl JobFilter {
    /// Create a new filter with defaults.
    pub fn new() -> Self {
        Self {
            statuses: Vec::new(),
            order: JobOrder::default(),
            limit: 100,
            offset: 0,
        }
    }

    /// Every job recovery must resume, oldest update first.
    pub fn unfinished() -> Self {
        Self {
            statuses: JobStatus::unfinished().to_vec(),
            order: JobOrder::UpdatedAsc,
            limit: i64::MAX,
            offset: 0,
        }
    }

    /// Add a status to the filter.
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn with_order(mut self, order: JobOrder) -> Self {
        self.order = order;
        self
    }

    /// Set limit.
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    /// Set offset.
    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Trait for job snapshot storage backends.
///
/// Snapshots are whole-record overwrites keyed by job id.
pub trait JobStore: Send + Sync {
    /// Insert a new job.
    fn insert(&self, job: &Job) -> Result<(), JobError>;

    /// Get a job by ID.
    fn get(&self, id: &str) -> Result<Option<Job>, JobError>;

    /// Overwrite an existing job's snapshot.
    fn save(&self, job: &Job) -> Result<(), JobError>;

    /// List jobs matching the filter.
    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobError>;

    /// Count jobs matching the filter.
    fn count(&self, filter: &JobFilter) -> Result<i64, JobError>;

    /// Jobs in `Created`, `InProgress` or `PartiallyReady`, least recently
    /// updated first.
    fn list_unfinished(&self) -> Result<Vec<Job>, JobError> {
        self.list(&JobFilter::unfinished())
    }
}
