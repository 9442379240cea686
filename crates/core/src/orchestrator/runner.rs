//! Job orchestrator implementation.
//!
//! Owns every job's lifecycle:
//! - Submit: validate, persist, then dispatch in the background
//! - Dispatch: publish one task per part that has not reported yet
//! - Results: merge under the job's lock, persist, cancel the deadline on READY
//! - Deadline: one timer per in-progress job
//! - Release: a terminal job leaves memory once its final state is stored
//! - Recovery: reload unfinished jobs on start and re-dispatch their missing parts

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::{part_range, DigestFn, EngineError, Md5Digest};
use crate::job::{Job, JobFilter, JobStatus, JobStore, PartOutcome};
use crate::messages::{ResultMessage, TaskMessage};
use crate::metrics::{JOBS_FINISHED, JOBS_SUBMITTED, PARTS_DISPATCHED, RESULTS_TOTAL};
use crate::transport::{HandlerOutcome, MessageHandler, Subscription, Transport, TransportError};

use super::config::OrchestratorConfig;
use super::timers::DeadlineTimers;
use super::types::{
    JobProgress, OrchestratorError, OrchestratorSummary, RecoveryReport, ResultOutcome,
};

/// A resident job and whether its latest state failed to persist.
struct JobEntry {
    job: Job,
    dirty: bool,
    /// Dropped from the table; holders must reload the job.
    released: bool,
}

impl JobEntry {
    fn new(job: Job) -> Self {
        Self {
            job,
            dirty: false,
            released: false,
        }
    }
}

type SharedEntry = Arc<Mutex<JobEntry>>;

/// The job orchestrator - splits jobs into parts and tracks them to completion.
///
/// Every mutation of a job happens under that job's lock, and no lock is
/// held while publishing.
pub struct JobOrchestrator {
    config: OrchestratorConfig,
    store: Arc<dyn JobStore>,
    transport: Arc<Transport>,
    digest: Arc<dyn DigestFn>,
    task_topic: String,
    result_topic: String,
    worker_count: AtomicU32,

    // Runtime state
    jobs: RwLock<HashMap<String, SharedEntry>>,
    timers: DeadlineTimers,
    running: AtomicBool,
    cancel: CancellationToken,
    results: Mutex<Option<Subscription>>,
}

impl JobOrchestrator {
    /// Create a new orchestrator.
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn JobStore>,
        transport: Arc<Transport>,
        task_topic: impl Into<String>,
        result_topic: impl Into<String>,
    ) -> Self {
        Self {
            worker_count: AtomicU32::new(config.worker_count),
            config,
            store,
            transport,
            digest: Arc::new(Md5Digest),
            task_topic: task_topic.into(),
            result_topic: result_topic.into(),
            jobs: RwLock::new(HashMap::new()),
            timers: DeadlineTimers::new(),
            running: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            results: Mutex::new(None),
        }
    }

    /// Use a different digest function for validating submissions.
    pub fn with_digest(mut self, digest: Arc<dyn DigestFn>) -> Self {
        self.digest = digest;
        self
    }

    /// Start consuming results and recover unfinished jobs in the background.
    ///
    /// An orchestrator cannot be started again after [`JobOrchestrator::stop`].
    pub async fn start(self: &Arc<Self>) {
        if self.cancel.is_cancelled() {
            warn!("Orchestrator was stopped and cannot be restarted");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Orchestrator already running");
            return;
        }

        info!("Starting job orchestrator");

        let handler = Arc::new(ResultHandler {
            orchestrator: Arc::downgrade(self),
        });
        let subscription = self.transport.subscribe::<ResultMessage, _>(
            &self.result_topic,
            handler,
            self.cancel.child_token(),
        );
        *self.results.lock().await = Some(subscription);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            match this.recover().await {
                Ok(report) if report.jobs > 0 => info!(
                    "Recovered {} unfinished jobs, republished {} parts",
                    report.jobs, report.parts
                ),
                Ok(_) => debug!("No unfinished jobs to recover"),
                Err(OrchestratorError::Transport(TransportError::Cancelled)) => {
                    debug!("Recovery cancelled by shutdown")
                }
                Err(e) => error!("Job recovery failed: {}", e),
            }
        });

        info!("Job orchestrator started");
    }

    /// Stop the orchestrator: cancel timers and pending publishes, stop the
    /// result consumer and flush unsaved job state.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Orchestrator not running");
            return;
        }

        info!("Stopping job orchestrator");

        self.cancel.cancel();
        self.timers.cancel_all();

        if let Some(subscription) = self.results.lock().await.take() {
            subscription.stop().await;
        }

        let unsaved = self.flush().await;
        if unsaved > 0 {
            warn!("{} jobs could not be persisted on shutdown", unsaved);
        }

        info!("Job orchestrator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Part count given to jobs submitted from now on.
    pub fn worker_count(&self) -> u32 {
        self.worker_count.load(Ordering::SeqCst)
    }

    /// Change the part count for future jobs. Existing jobs keep theirs.
    pub fn set_worker_count(&self, count: u32) -> Result<(), OrchestratorError> {
        if count == 0 {
            return Err(OrchestratorError::InvalidRequest(
                "worker count must be greater than 0".to_string(),
            ));
        }
        let previous = self.worker_count.swap(count, Ordering::SeqCst);
        info!("Worker count changed from {} to {}", previous, count);
        Ok(())
    }

    /// Accept a crack request and return its job id.
    ///
    /// The job is persisted as IN_PROGRESS and its deadline armed before this
    /// returns; its parts are published in the background. A store failure
    /// fails the submission.
    pub async fn submit(
        self: &Arc<Self>,
        target_digest: &str,
        max_length: u32,
    ) -> Result<String, OrchestratorError> {
        let digest = self.normalize_digest(target_digest)?;

        if max_length == 0 {
            return Err(OrchestratorError::InvalidRequest(
                "maxLength must be greater than 0".to_string(),
            ));
        }
        if max_length > self.config.max_length_limit {
            return Err(OrchestratorError::InvalidRequest(format!(
                "maxLength must not exceed {}",
                self.config.max_length_limit
            )));
        }

        let mut job = Job::new(
            digest,
            max_length,
            self.config.alphabet.clone(),
            self.worker_count(),
        );
        job.space()?;
        job.begin();

        self.store.insert(&job)?;
        JOBS_SUBMITTED.inc();

        let job_id = job.id.clone();
        info!(
            "Accepted job {} (max length {}, {} parts)",
            job_id, job.max_length, job.part_count
        );

        self.jobs.write().await.insert(
            job_id.clone(),
            Arc::new(Mutex::new(JobEntry::new(job))),
        );
        self.arm_deadline(&job_id);
        self.spawn_dispatch(&job_id);

        Ok(job_id)
    }

    /// Publish a task for every part of a job without a result, moving a
    /// CREATED job to IN_PROGRESS and arming a missing deadline first.
    /// Returns the number published.
    ///
    /// Blocks while the broker is unavailable.
    pub async fn dispatch(self: &Arc<Self>, job_id: &str) -> Result<usize, OrchestratorError> {
        let entry = self
            .resident(job_id)
            .await
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))?;

        let tasks = {
            let mut guard = entry.lock().await;
            if guard.job.begin() {
                self.persist(&mut guard);
            }
            if guard.job.status == JobStatus::InProgress && !self.timers.is_armed(job_id) {
                self.arm_deadline(job_id);
            }
            let tasks = Self::pending_tasks(&guard.job)?;
            self.release_if_settled(&mut guard).await;
            tasks
        };

        for task in &tasks {
            self.transport
                .publish(&self.task_topic, task, &self.cancel)
                .await?;
            PARTS_DISPATCHED.inc();
        }

        if !tasks.is_empty() {
            debug!("Published {} parts of job {}", tasks.len(), job_id);
        }
        Ok(tasks.len())
    }

    /// Merge one part result into its job.
    ///
    /// Duplicates and results for unknown jobs are discarded. A failure to
    /// persist is logged and retried on the job's next update.
    pub async fn on_result(&self, result: ResultMessage) -> Result<ResultOutcome, OrchestratorError> {
        let mut guard = loop {
            let Some(entry) = self.load(&result.job_id).await? else {
                RESULTS_TOTAL.with_label_values(&["unknown_job"]).inc();
                warn!(
                    "Discarding result for unknown job {} (part {})",
                    result.job_id, result.part_number
                );
                return Ok(ResultOutcome::UnknownJob);
            };
            let guard = entry.lock_owned().await;
            if !guard.released {
                break guard;
            }
        };

        let outcome = match guard.job.record_part(result.part_number, result.matches) {
            PartOutcome::OutOfRange => {
                RESULTS_TOTAL.with_label_values(&["rejected"]).inc();
                Err(OrchestratorError::InvalidResult(format!(
                    "part {} out of range for job {} with {} parts",
                    result.part_number, result.job_id, guard.job.part_count
                )))
            }
            PartOutcome::Duplicate => {
                RESULTS_TOTAL.with_label_values(&["duplicate"]).inc();
                debug!(
                    "Ignoring duplicate result for job {} part {}",
                    result.job_id, result.part_number
                );
                if guard.dirty {
                    self.persist(&mut guard);
                }
                Ok(ResultOutcome::Duplicate)
            }
            PartOutcome::Merged { became_ready } => {
                RESULTS_TOTAL.with_label_values(&["merged"]).inc();
                if became_ready {
                    self.timers.cancel(&result.job_id);
                    JOBS_FINISHED
                        .with_label_values(&[JobStatus::Ready.as_str()])
                        .inc();
                    info!(
                        "Job {} ready with {} match(es)",
                        result.job_id,
                        guard.job.matches.len()
                    );
                } else {
                    debug!(
                        "Job {} part {} merged ({}%)",
                        result.job_id,
                        result.part_number,
                        guard.job.progress_percent()
                    );
                }
                self.persist(&mut guard);
                Ok(ResultOutcome::Merged)
            }
        };

        self.release_if_settled(&mut guard).await;
        outcome
    }

    /// Current status, matches and progress of a job.
    ///
    /// Falls back to the store for jobs that are not resident.
    pub async fn status(&self, job_id: &str) -> Result<JobProgress, OrchestratorError> {
        if let Some(entry) = self.resident(job_id).await {
            let guard = entry.lock().await;
            return Ok(JobProgress::from(&guard.job));
        }

        match self.store.get(job_id)? {
            Some(job) => Ok(JobProgress::from(&job)),
            None => Err(OrchestratorError::JobNotFound(job_id.to_string())),
        }
    }

    /// Reload unfinished jobs, least recently updated first, and re-dispatch
    /// every part that has not reported.
    pub async fn recover(self: &Arc<Self>) -> Result<RecoveryReport, OrchestratorError> {
        let jobs = self.store.list_unfinished()?;

        let mut ids = Vec::with_capacity(jobs.len());
        {
            let mut table = self.jobs.write().await;
            for job in jobs {
                ids.push(job.id.clone());
                table
                    .entry(job.id.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(JobEntry::new(job))));
            }
        }

        let mut report = RecoveryReport {
            jobs: ids.len(),
            parts: 0,
        };
        for id in &ids {
            match self.dispatch(id).await {
                Ok(parts) => {
                    info!("Recovered job {}: republished {} parts", id, parts);
                    report.parts += parts;
                }
                Err(e @ OrchestratorError::Transport(TransportError::Cancelled)) => return Err(e),
                Err(e) => error!("Failed to recover job {}: {}", id, e),
            }
        }

        Ok(report)
    }

    /// Persist every job whose last save failed, releasing the ones that are
    /// settled. Returns how many still fail.
    pub async fn flush(&self) -> usize {
        let entries: Vec<SharedEntry> = self.jobs.read().await.values().cloned().collect();
        let mut unsaved = 0;
        for entry in entries {
            let mut guard = entry.lock().await;
            if guard.dirty {
                self.persist(&mut guard);
                if guard.dirty {
                    unsaved += 1;
                } else {
                    self.release_if_settled(&mut guard).await;
                }
            }
        }
        unsaved
    }

    /// Get current orchestrator status.
    pub async fn summary(&self) -> OrchestratorSummary {
        let count = |status: JobStatus| {
            self.store
                .count(&JobFilter::new().with_status(status))
                .unwrap_or(0) as usize
        };

        OrchestratorSummary {
            running: self.is_running(),
            worker_count: self.worker_count(),
            resident_jobs: self.jobs.read().await.len(),
            armed_timers: self.timers.len(),
            created_count: count(JobStatus::Created),
            in_progress_count: count(JobStatus::InProgress),
            partially_ready_count: count(JobStatus::PartiallyReady),
            ready_count: count(JobStatus::Ready),
            error_count: count(JobStatus::Error),
        }
    }

    fn spawn_dispatch(self: &Arc<Self>, job_id: &str) {
        let this = Arc::clone(self);
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            match this.dispatch(&job_id).await {
                Ok(_) => {}
                Err(OrchestratorError::Transport(TransportError::Cancelled)) => {
                    debug!("Dispatch of job {} cancelled by shutdown", job_id)
                }
                Err(e) => error!("Failed to dispatch job {}: {}", job_id, e),
            }
        });
    }

    fn arm_deadline(self: &Arc<Self>, job_id: &str) {
        let this = Arc::downgrade(self);
        let id = job_id.to_string();
        let timeout = self.config.job_timeout();
        self.timers.arm(job_id, async move {
            tokio::time::sleep(timeout).await;
            if let Some(this) = this.upgrade() {
                this.on_timeout(&id).await;
            }
        });
    }

    /// Apply the deadline. The job may have finished since the timer fired,
    /// so only an IN_PROGRESS job transitions.
    async fn on_timeout(&self, job_id: &str) {
        let Some(entry) = self.resident(job_id).await else {
            return;
        };
        let mut guard = entry.lock().await;
        if guard.released {
            return;
        }
        if let Some(status) = guard.job.time_out() {
            JOBS_FINISHED.with_label_values(&[status.as_str()]).inc();
            warn!(
                "Job {} timed out with {}/{} parts complete, now {}",
                job_id,
                guard.job.completed_parts.len(),
                guard.job.part_count,
                status
            );
            self.persist(&mut guard);
            self.release_if_settled(&mut guard).await;
        }
    }

    fn pending_tasks(job: &Job) -> Result<Vec<TaskMessage>, EngineError> {
        let space = job.space()?;
        job.pending_parts()
            .map(|part| {
                let range = part_range(space.total(), job.part_count, part)?;
                Ok(TaskMessage {
                    job_id: job.id.clone(),
                    part_number: part,
                    part_count: job.part_count,
                    target_digest: job.target_digest.clone(),
                    max_length: job.max_length,
                    alphabet: job.alphabet.clone(),
                    start: range.start,
                    end: range.end,
                })
            })
            .collect()
    }

    fn persist(&self, entry: &mut JobEntry) {
        match self.store.save(&entry.job) {
            Ok(()) => {
                if entry.dirty {
                    info!("Persisted pending changes of job {}", entry.job.id);
                }
                entry.dirty = false;
            }
            Err(e) => {
                warn!(
                    "Failed to persist job {}, will retry on next update: {}",
                    entry.job.id, e
                );
                entry.dirty = true;
            }
        }
    }

    /// Drop a terminal job whose final state is stored. Later reads and late
    /// results go through the store.
    async fn release_if_settled(&self, entry: &mut JobEntry) {
        if !entry.job.status.is_terminal() || entry.dirty || entry.released {
            return;
        }
        self.jobs.write().await.remove(&entry.job.id);
        entry.released = true;
        self.timers.cancel(&entry.job.id);
        debug!("Released job {} ({})", entry.job.id, entry.job.status);
    }

    fn normalize_digest(&self, raw: &str) -> Result<String, OrchestratorError> {
        let digest = raw.trim().to_ascii_lowercase();
        if digest.is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "hash must not be empty".to_string(),
            ));
        }

        let expected = self.digest.hex_len();
        if digest.len() != expected || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(OrchestratorError::InvalidRequest(format!(
                "hash must be {} hexadecimal characters",
                expected
            )));
        }
        Ok(digest)
    }

    async fn resident(&self, job_id: &str) -> Option<SharedEntry> {
        self.jobs.read().await.get(job_id).cloned()
    }

    /// Resident entry, loading the job from the store if needed.
    async fn load(&self, job_id: &str) -> Result<Option<SharedEntry>, OrchestratorError> {
        if let Some(entry) = self.resident(job_id).await {
            return Ok(Some(entry));
        }

        let Some(job) = self.store.get(job_id)? else {
            return Ok(None);
        };
        debug!("Loaded job {} from store", job_id);

        let mut table = self.jobs.write().await;
        let entry = table
            .entry(job_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(JobEntry::new(job))));
        Ok(Some(Arc::clone(entry)))
    }
}

/// Feeds result messages into the orchestrator.
struct ResultHandler {
    orchestrator: Weak<JobOrchestrator>,
}

#[async_trait]
impl MessageHandler<ResultMessage> for ResultHandler {
    async fn handle(&self, message: ResultMessage) -> HandlerOutcome {
        let Some(orchestrator) = self.orchestrator.upgrade() else {
            return HandlerOutcome::Retry;
        };

        match orchestrator.on_result(message).await {
            Ok(_) => HandlerOutcome::Ack,
            Err(OrchestratorError::InvalidResult(reason)) => {
                warn!("Rejecting result: {}", reason);
                HandlerOutcome::Reject
            }
            Err(e) => {
                warn!("Failed to apply result, will retry: {}", e);
                HandlerOutcome::Retry
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::job::SqliteJobStore;
    use crate::testing::{fixtures, MockJobStore};
    use crate::transport::MemoryBroker;

    const TASKS: &str = "tasks";
    const RESULTS: &str = "results";

    struct Harness {
        orchestrator: Arc<JobOrchestrator>,
        broker: MemoryBroker,
        store: Arc<dyn JobStore>,
    }

    fn harness_with_store(
        worker_count: u32,
        timeout: Duration,
        store: Arc<dyn JobStore>,
    ) -> Harness {
        let broker = MemoryBroker::new();
        let transport = Arc::new(Transport::new(
            Arc::new(broker.clone()),
            Duration::from_millis(10),
        ));
        let orchestrator = Arc::new(JobOrchestrator::new(
            fixtures::orchestrator_config(worker_count, timeout),
            Arc::clone(&store),
            transport,
            TASKS,
            RESULTS,
        ));
        Harness {
            orchestrator,
            broker,
            store,
        }
    }

    fn harness(worker_count: u32, timeout: Duration) -> Harness {
        harness_with_store(
            worker_count,
            timeout,
            Arc::new(SqliteJobStore::in_memory().unwrap()),
        )
    }

    fn published(broker: &MemoryBroker) -> Vec<TaskMessage> {
        broker
            .peek(TASKS)
            .iter()
            .map(|p| serde_json::from_slice(p).unwrap())
            .collect()
    }

    async fn wait_for_tasks(broker: &MemoryBroker, n: usize) -> Vec<TaskMessage> {
        for _ in 0..1000 {
            if broker.pending(TASKS) >= n {
                return published(broker);
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("expected {} tasks, got {}", n, broker.pending(TASKS));
    }

    fn result(job_id: &str, part: u32, matches: &[&str]) -> ResultMessage {
        ResultMessage {
            job_id: job_id.to_string(),
            part_number: part,
            matches: matches.iter().map(|m| m.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_submit_dispatches_explicit_ranges() {
        let h = harness(2, Duration::from_secs(300));
        let id = h
            .orchestrator
            .submit(&fixtures::md5_hex("ab"), 2)
            .await
            .unwrap();

        let tasks = wait_for_tasks(&h.broker, 2).await;
        assert_eq!(tasks.len(), 2);
        assert_eq!((tasks[0].part_number, tasks[0].start, tasks[0].end), (0, 0, 3));
        assert_eq!((tasks[1].part_number, tasks[1].start, tasks[1].end), (1, 3, 6));
        assert!(tasks.iter().all(|t| t.job_id == id && t.part_count == 2));

        let status = h.orchestrator.status(&id).await.unwrap();
        assert_eq!(status.status, JobStatus::InProgress);
        assert_eq!(status.progress, 0);
        assert_eq!(h.store.get(&id).unwrap().unwrap().status, JobStatus::InProgress);
    }

    #[tokio::test]
    async fn test_submit_normalizes_digest_case() {
        let h = harness(1, Duration::from_secs(300));
        let upper = fixtures::md5_hex("ab").to_uppercase();
        let id = h.orchestrator.submit(&upper, 2).await.unwrap();

        let job = h.store.get(&id).unwrap().unwrap();
        assert_eq!(job.target_digest, fixtures::md5_hex("ab"));
    }

    #[tokio::test]
    async fn test_submit_rejects_empty_digest() {
        let h = harness(2, Duration::from_secs(300));
        let result = h.orchestrator.submit("", 2).await;

        assert!(matches!(result, Err(OrchestratorError::InvalidRequest(_))));
        assert_eq!(h.store.count(&JobFilter::new()).unwrap(), 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.broker.pending(TASKS), 0);
    }

    #[tokio::test]
    async fn test_submit_rejects_malformed_digest() {
        let h = harness(2, Duration::from_secs(300));
        for bad in ["xyz", "zz7ef4436122d1cc2f40dc2b92f0eba0", "187ef443"] {
            let result = h.orchestrator.submit(bad, 2).await;
            assert!(matches!(result, Err(OrchestratorError::InvalidRequest(_))));
        }
    }

    #[tokio::test]
    async fn test_submit_rejects_bad_max_length() {
        let h = harness(2, Duration::from_secs(300));
        let digest = fixtures::md5_hex("ab");

        let zero = h.orchestrator.submit(&digest, 0).await;
        assert!(matches!(zero, Err(OrchestratorError::InvalidRequest(_))));
        let too_long = h.orchestrator.submit(&digest, 9).await;
        assert!(matches!(too_long, Err(OrchestratorError::InvalidRequest(_))));
        assert_eq!(h.store.count(&JobFilter::new()).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_submit_fails_when_store_fails() {
        let store = Arc::new(MockJobStore::new());
        store.set_fail_inserts(true);
        let h = harness_with_store(2, Duration::from_secs(300), store);

        let result = h.orchestrator.submit(&fixtures::md5_hex("ab"), 2).await;
        assert!(matches!(result, Err(OrchestratorError::Store(_))));
        assert_eq!(h.orchestrator.summary().await.resident_jobs, 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.broker.pending(TASKS), 0);
    }

    #[tokio::test]
    async fn test_results_complete_job() {
        let h = harness(2, Duration::from_secs(300));
        let id = h
            .orchestrator
            .submit(&fixtures::md5_hex("ab"), 2)
            .await
            .unwrap();
        wait_for_tasks(&h.broker, 2).await;

        let outcome = h.orchestrator.on_result(result(&id, 1, &["ab"])).await.unwrap();
        assert_eq!(outcome, ResultOutcome::Merged);
        let status = h.orchestrator.status(&id).await.unwrap();
        assert_eq!(status.status, JobStatus::InProgress);
        assert_eq!(status.progress, 50);

        h.orchestrator.on_result(result(&id, 0, &[])).await.unwrap();
        let status = h.orchestrator.status(&id).await.unwrap();
        assert_eq!(status.status, JobStatus::Ready);
        assert_eq!(status.matches, vec!["ab"]);
        assert_eq!(status.progress, 100);
        assert_eq!(h.orchestrator.summary().await.armed_timers, 0);

        let stored = h.store.get(&id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Ready);
    }

    #[tokio::test]
    async fn test_ready_job_leaves_memory() {
        let h = harness(2, Duration::from_secs(300));
        let id = h
            .orchestrator
            .submit(&fixtures::md5_hex("ab"), 2)
            .await
            .unwrap();
        wait_for_tasks(&h.broker, 2).await;
        assert_eq!(h.orchestrator.summary().await.resident_jobs, 1);

        h.orchestrator.on_result(result(&id, 0, &[])).await.unwrap();
        assert_eq!(h.orchestrator.summary().await.resident_jobs, 1);
        h.orchestrator.on_result(result(&id, 1, &["ab"])).await.unwrap();

        let summary = h.orchestrator.summary().await;
        assert_eq!(summary.resident_jobs, 0);
        assert_eq!(summary.armed_timers, 0);
        assert_eq!(summary.ready_count, 1);

        // Served from the store from now on.
        let status = h.orchestrator.status(&id).await.unwrap();
        assert_eq!(status.status, JobStatus::Ready);
        assert_eq!(status.matches, vec!["ab"]);
        let outcome = h.orchestrator.on_result(result(&id, 1, &["ab"])).await.unwrap();
        assert_eq!(outcome, ResultOutcome::Duplicate);
        assert_eq!(h.orchestrator.summary().await.resident_jobs, 0);
    }

    #[tokio::test]
    async fn test_unsaved_ready_job_stays_until_flushed() {
        let store = Arc::new(MockJobStore::new());
        let h = harness_with_store(1, Duration::from_secs(300), store.clone());
        let id = h
            .orchestrator
            .submit(&fixtures::md5_hex("ab"), 2)
            .await
            .unwrap();
        wait_for_tasks(&h.broker, 1).await;

        store.set_fail_saves(true);
        h.orchestrator.on_result(result(&id, 0, &["ab"])).await.unwrap();
        assert_eq!(h.orchestrator.summary().await.resident_jobs, 1);
        assert_eq!(
            h.orchestrator.status(&id).await.unwrap().status,
            JobStatus::Ready
        );

        store.set_fail_saves(false);
        assert_eq!(h.orchestrator.flush().await, 0);
        assert_eq!(store.snapshot(&id).unwrap().status, JobStatus::Ready);
        assert_eq!(h.orchestrator.summary().await.resident_jobs, 0);
    }

    #[tokio::test]
    async fn test_duplicate_result_after_ready_is_noop() {
        let h = harness(2, Duration::from_secs(300));
        let id = h
            .orchestrator
            .submit(&fixtures::md5_hex("ab"), 2)
            .await
            .unwrap();
        wait_for_tasks(&h.broker, 2).await;

        h.orchestrator.on_result(result(&id, 0, &[])).await.unwrap();
        h.orchestrator.on_result(result(&id, 1, &["ab"])).await.unwrap();
        let before = h.orchestrator.status(&id).await.unwrap();

        let outcome = h
            .orchestrator
            .on_result(result(&id, 1, &["ab", "bogus"]))
            .await
            .unwrap();
        assert_eq!(outcome, ResultOutcome::Duplicate);
        assert_eq!(h.orchestrator.status(&id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_result_for_unknown_job() {
        let h = harness(2, Duration::from_secs(300));
        let outcome = h
            .orchestrator
            .on_result(result("no-such-job", 0, &[]))
            .await
            .unwrap();
        assert_eq!(outcome, ResultOutcome::UnknownJob);
    }

    #[tokio::test]
    async fn test_result_with_out_of_range_part() {
        let h = harness(2, Duration::from_secs(300));
        let id = h
            .orchestrator
            .submit(&fixtures::md5_hex("ab"), 2)
            .await
            .unwrap();

        let err = h.orchestrator.on_result(result(&id, 2, &[])).await;
        assert!(matches!(err, Err(OrchestratorError::InvalidResult(_))));
        assert_eq!(h.orchestrator.status(&id).await.unwrap().progress, 0);
    }

    #[tokio::test]
    async fn test_result_for_job_only_in_store() {
        let h = harness(2, Duration::from_secs(300));
        let job = fixtures::job("ab", 2, 2);
        h.store.insert(&job).unwrap();

        let outcome = h
            .orchestrator
            .on_result(result(&job.id, 0, &[]))
            .await
            .unwrap();
        assert_eq!(outcome, ResultOutcome::Merged);
        assert_eq!(h.store.get(&job.id).unwrap().unwrap().completed_parts.len(), 1);
    }

    #[tokio::test]
    async fn test_status_falls_back_to_store() {
        let h = harness(2, Duration::from_secs(300));
        let mut job = fixtures::job("ab", 2, 4);
        job.record_part(0, vec!["ab".to_string()]);
        h.store.insert(&job).unwrap();

        let status = h.orchestrator.status(&job.id).await.unwrap();
        assert_eq!(status.status, JobStatus::InProgress);
        assert_eq!(status.matches, vec!["ab"]);
        assert_eq!(status.progress, 25);

        let missing = h.orchestrator.status("missing").await;
        assert!(matches!(missing, Err(OrchestratorError::JobNotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_without_results_is_error() {
        let h = harness(2, Duration::from_secs(60));
        let id = h
            .orchestrator
            .submit(&fixtures::md5_hex("ab"), 2)
            .await
            .unwrap();
        wait_for_tasks(&h.broker, 2).await;

        tokio::time::sleep(Duration::from_secs(61)).await;
        let status = h.orchestrator.status(&id).await.unwrap();
        assert_eq!(status.status, JobStatus::Error);
        assert_eq!(h.orchestrator.summary().await.resident_jobs, 0);
        assert_eq!(h.store.get(&id).unwrap().unwrap().status, JobStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_with_some_results_is_partial() {
        let h = harness(2, Duration::from_secs(60));
        let id = h
            .orchestrator
            .submit(&fixtures::md5_hex("ab"), 2)
            .await
            .unwrap();
        wait_for_tasks(&h.broker, 2).await;
        h.orchestrator.on_result(result(&id, 0, &[])).await.unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;
        let status = h.orchestrator.status(&id).await.unwrap();
        assert_eq!(status.status, JobStatus::PartiallyReady);
        assert_eq!(status.progress, 50);

        // Late result: merged for completeness, status stays terminal.
        h.orchestrator.on_result(result(&id, 1, &["ab"])).await.unwrap();
        let status = h.orchestrator.status(&id).await.unwrap();
        assert_eq!(status.status, JobStatus::PartiallyReady);
        assert_eq!(status.matches, vec!["ab"]);
        assert_eq!(status.progress, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_job_ignores_deadline() {
        let h = harness(1, Duration::from_secs(60));
        let id = h
            .orchestrator
            .submit(&fixtures::md5_hex("ab"), 2)
            .await
            .unwrap();
        wait_for_tasks(&h.broker, 1).await;
        h.orchestrator.on_result(result(&id, 0, &["ab"])).await.unwrap();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(
            h.orchestrator.status(&id).await.unwrap().status,
            JobStatus::Ready
        );
    }

    #[tokio::test]
    async fn test_recovery_republishes_only_missing_parts() {
        let h = harness(3, Duration::from_secs(300));
        let mut job = fixtures::job("ab", 2, 3);
        job.record_part(0, vec![]);
        job.record_part(2, vec!["ab".to_string()]);
        h.store.insert(&job).unwrap();

        let report = h.orchestrator.recover().await.unwrap();
        assert_eq!(report, RecoveryReport { jobs: 1, parts: 1 });

        let tasks = published(&h.broker);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].part_number, 1);
        assert_eq!((tasks[0].start, tasks[0].end), (2, 4));
        assert_eq!(h.orchestrator.summary().await.armed_timers, 1);
    }

    #[tokio::test]
    async fn test_recovery_normalizes_created_jobs() {
        let h = harness(2, Duration::from_secs(300));
        let job = Job::new(fixtures::md5_hex("ab"), 2, fixtures::ab_alphabet(), 2);
        h.store.insert(&job).unwrap();

        let report = h.orchestrator.recover().await.unwrap();
        assert_eq!(report.parts, 2);
        assert_eq!(
            h.store.get(&job.id).unwrap().unwrap().status,
            JobStatus::InProgress
        );
    }

    #[tokio::test]
    async fn test_recovery_completes_partial_jobs_without_deadline() {
        let h = harness(2, Duration::from_secs(300));
        let mut job = fixtures::job("ab", 2, 2);
        job.record_part(0, vec![]);
        job.time_out();
        h.store.insert(&job).unwrap();

        let report = h.orchestrator.recover().await.unwrap();
        assert_eq!(report.parts, 1);
        assert_eq!(h.orchestrator.summary().await.armed_timers, 0);
    }

    #[tokio::test]
    async fn test_recovery_skips_finished_jobs() {
        let h = harness(2, Duration::from_secs(300));
        let mut ready = fixtures::job("ab", 2, 1);
        ready.record_part(0, vec!["ab".to_string()]);
        let mut failed = fixtures::job("ab", 2, 2);
        failed.time_out();
        h.store.insert(&ready).unwrap();
        h.store.insert(&failed).unwrap();

        let report = h.orchestrator.recover().await.unwrap();
        assert_eq!(report, RecoveryReport::default());
        assert_eq!(h.broker.pending(TASKS), 0);
    }

    #[tokio::test]
    async fn test_persist_failure_is_retried_on_next_update() {
        let store = Arc::new(MockJobStore::new());
        let h = harness_with_store(3, Duration::from_secs(300), store.clone());
        let id = h
            .orchestrator
            .submit(&fixtures::md5_hex("ab"), 2)
            .await
            .unwrap();
        wait_for_tasks(&h.broker, 3).await;

        store.set_fail_saves(true);
        h.orchestrator.on_result(result(&id, 0, &["ab"])).await.unwrap();
        // Merge proceeds in memory even though the save failed.
        assert_eq!(h.orchestrator.status(&id).await.unwrap().progress, 33);
        assert!(store.snapshot(&id).unwrap().completed_parts.is_empty());

        store.set_fail_saves(false);
        h.orchestrator.on_result(result(&id, 0, &["ab"])).await.unwrap();
        let stored = store.snapshot(&id).unwrap();
        assert_eq!(stored.completed_parts.len(), 1);
        assert!(stored.matches.contains("ab"));
    }

    #[tokio::test]
    async fn test_flush_persists_dirty_jobs() {
        let store = Arc::new(MockJobStore::new());
        let h = harness_with_store(2, Duration::from_secs(300), store.clone());
        let id = h
            .orchestrator
            .submit(&fixtures::md5_hex("ab"), 2)
            .await
            .unwrap();
        wait_for_tasks(&h.broker, 2).await;

        store.set_fail_saves(true);
        h.orchestrator.on_result(result(&id, 1, &[])).await.unwrap();
        assert_eq!(h.orchestrator.flush().await, 1);

        store.set_fail_saves(false);
        assert_eq!(h.orchestrator.flush().await, 0);
        assert_eq!(store.snapshot(&id).unwrap().completed_parts.len(), 1);
    }

    #[tokio::test]
    async fn test_worker_count_applies_to_new_jobs_only() {
        let h = harness(2, Duration::from_secs(300));
        let first = h
            .orchestrator
            .submit(&fixtures::md5_hex("ab"), 2)
            .await
            .unwrap();

        h.orchestrator.set_worker_count(4).unwrap();
        assert!(h.orchestrator.set_worker_count(0).is_err());
        let second = h
            .orchestrator
            .submit(&fixtures::md5_hex("ab"), 2)
            .await
            .unwrap();

        assert_eq!(h.store.get(&first).unwrap().unwrap().part_count, 2);
        assert_eq!(h.store.get(&second).unwrap().unwrap().part_count, 4);
    }

    #[tokio::test]
    async fn test_concurrent_results_are_all_merged() {
        let h = harness(40, Duration::from_secs(300));
        let id = h
            .orchestrator
            .submit(&fixtures::md5_hex("ab"), 5)
            .await
            .unwrap();
        wait_for_tasks(&h.broker, 40).await;

        let mut handles = Vec::new();
        for part in 0..40u32 {
            for _ in 0..2 {
                let orchestrator = Arc::clone(&h.orchestrator);
                let id = id.clone();
                let found = format!("m{}", part % 3);
                handles.push(tokio::spawn(async move {
                    orchestrator
                        .on_result(result(&id, part, &[found.as_str()]))
                        .await
                        .unwrap()
                }));
            }
        }
        let outcomes: Vec<ResultOutcome> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let merged = outcomes.iter().filter(|o| **o == ResultOutcome::Merged).count();
        assert_eq!(merged, 40);
        let status = h.orchestrator.status(&id).await.unwrap();
        assert_eq!(status.status, JobStatus::Ready);
        assert_eq!(status.matches, vec!["m0", "m1", "m2"]);
    }

    #[tokio::test]
    async fn test_start_consumes_results_and_stop_flushes() {
        let h = harness(1, Duration::from_secs(300));
        h.orchestrator.start().await;
        assert!(h.orchestrator.is_running());

        let id = h
            .orchestrator
            .submit(&fixtures::md5_hex("ab"), 2)
            .await
            .unwrap();
        wait_for_tasks(&h.broker, 1).await;

        let transport = Transport::new(Arc::new(h.broker.clone()), Duration::from_millis(10));
        let cancel = CancellationToken::new();
        transport
            .publish(RESULTS, &result(&id, 0, &["ab"]), &cancel)
            .await
            .unwrap();

        for _ in 0..1000 {
            if h.orchestrator.status(&id).await.unwrap().status == JobStatus::Ready {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(
            h.orchestrator.status(&id).await.unwrap().status,
            JobStatus::Ready
        );

        h.orchestrator.stop().await;
        assert!(!h.orchestrator.is_running());
    }

    #[tokio::test]
    async fn test_summary_counts_statuses() {
        let h = harness(2, Duration::from_secs(300));
        let mut ready = fixtures::job("ab", 2, 1);
        ready.record_part(0, vec![]);
        h.store.insert(&ready).unwrap();
        h.store.insert(&fixtures::job("ab", 2, 2)).unwrap();

        let summary = h.orchestrator.summary().await;
        assert!(!summary.running);
        assert_eq!(summary.worker_count, 2);
        assert_eq!(summary.ready_count, 1);
        assert_eq!(summary.in_progress_count, 1);
    }
}
