//! Per-job deadline timers.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use tokio::task::JoinHandle;

/// Cancellable timers keyed by job id. At most one per job.
#[derive(Default)]
pub(crate) struct DeadlineTimers {
    handles: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl DeadlineTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `fire` as the timer for `job_id`, replacing any earlier one.
    pub fn arm<F>(&self, job_id: &str, fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(fire);
        let mut handles = self.handles.lock().unwrap();
        handles.retain(|_, h| !h.is_finished());
        if let Some(old) = handles.insert(job_id.to_string(), handle) {
            old.abort();
        }
    }

    pub fn is_armed(&self, job_id: &str) -> bool {
        self.handles
            .lock()
            .unwrap()
            .get(job_id)
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Cancel the timer for `job_id`. A timer that already fired is unaffected.
    pub fn cancel(&self, job_id: &str) {
        if let Some(handle) = self.handles.lock().unwrap().remove(job_id) {
            handle.abort();
        }
    }

    pub fn cancel_all(&self) {
        for (_, handle) in self.handles.lock().unwrap().drain() {
            handle.abort();
        }
    }

    pub fn len(&self) -> usize {
        self.handles
            .lock()
            .unwrap()
            .values()
            .filter(|h| !h.is_finished())
            .count()
    }
}
