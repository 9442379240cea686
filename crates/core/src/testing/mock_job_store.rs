//! Mock job store for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::job::{Job, JobError, JobFilter, JobOrder, JobStore};

/// In-memory job store with failure injection.
///
/// Provides controllable behavior for testing:
/// - Make inserts or saves fail with a database error
/// - Count successful saves for assertions
#[derive(Debug, Default)]
pub struct MockJobStore {
    jobs: Mutex<HashMap<String, Job>>,
    fail_inserts: AtomicBool,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

impl MockJobStore {
    /// Create a new mock store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every insert fail until reset.
    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Make every save fail until reset.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// The stored snapshot of a job, bypassing failure injection.
    pub fn snapshot(&self, id: &str) -> Option<Job> {
        self.jobs.lock().unwrap().get(id).cloned()
    }

    /// Number of stored jobs.
    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn matching(&self, filter: &JobFilter) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| filter.statuses.is_empty() || filter.statuses.contains(&j.status))
            .cloned()
            .collect();
        match filter.order {
            JobOrder::CreatedDesc => jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            JobOrder::UpdatedAsc => jobs.sort_by(|a, b| a.updated_at.cmp(&b.updated_at)),
        }
        jobs
    }
}

impl JobStore for MockJobStore {
    fn insert(&self, job: &Job) -> Result<(), JobError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(JobError::Database("injected insert failure".to_string()));
        }
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.contains_key(&job.id) {
            return Err(JobError::AlreadyExists(job.id.clone()));
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Job>, JobError> {
        Ok(self.snapshot(id))
    }

    fn save(&self, job: &Job) -> Result<(), JobError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(JobError::Database("injected save failure".to_string()));
        }
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(&job.id) {
            Some(stored) => {
                *stored = job.clone();
                self.saves.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(JobError::NotFound(job.id.clone())),
        }
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobError> {
        Ok(self
            .matching(filter)
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect())
    }

    fn count(&self, filter: &JobFilter) -> Result<i64, JobError> {
        Ok(self.matching(filter).len() as i64)
    }
}
