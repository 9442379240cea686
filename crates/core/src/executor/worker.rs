//! Task consumption: run the engine over a task's range and report back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::{execute_until, DigestFn, Md5Digest};
use crate::messages::{ResultMessage, TaskMessage};
use crate::metrics::{TASKS_EXECUTED, TASK_DURATION};
use crate::transport::{HandlerOutcome, MessageHandler, Subscription, Transport, TransportError};

use super::config::ExecutorConfig;

/// Consumes task messages, searches their range and publishes the matches.
pub struct TaskExecutor {
    config: ExecutorConfig,
    handler: Arc<TaskHandler>,
    transport: Arc<Transport>,
    task_topic: String,
    running: AtomicBool,
    cancel: CancellationToken,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl TaskExecutor {
    pub fn new(
        config: ExecutorConfig,
        transport: Arc<Transport>,
        task_topic: impl Into<String>,
        result_topic: impl Into<String>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let handler = Arc::new(TaskHandler {
            name: config.name.clone(),
            transport: Arc::clone(&transport),
            digest: Arc::new(Md5Digest),
            result_topic: result_topic.into(),
            cancel: cancel.clone(),
        });
        Self {
            config,
            handler,
            transport,
            task_topic: task_topic.into(),
            running: AtomicBool::new(false),
            cancel,
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Use a different digest function. Must match the orchestrator's.
    pub fn with_digest(mut self, digest: Arc<dyn DigestFn>) -> Self {
        self.handler = Arc::new(TaskHandler {
            name: self.handler.name.clone(),
            transport: Arc::clone(&self.transport),
            digest,
            result_topic: self.handler.result_topic.clone(),
            cancel: self.cancel.clone(),
        });
        self
    }

    /// Start the consume loops.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Executor {} already running", self.config.name);
            return;
        }

        let consumers = self.config.consumers.max(1);
        let mut subscriptions = self.subscriptions.lock().await;
        for _ in 0..consumers {
            subscriptions.push(self.transport.subscribe::<TaskMessage, _>(
                &self.task_topic,
                Arc::clone(&self.handler),
                self.cancel.child_token(),
            ));
        }

        info!(
            "Executor {} started with {} consumer(s) on {}",
            self.config.name, consumers, self.task_topic
        );
    }

    /// Stop consuming. A search in progress is abandoned within a few
    /// thousand candidates and its task redelivered, unless its result was
    /// already published.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Executor {} not running", self.config.name);
            return;
        }

        self.cancel.cancel();
        let subscriptions: Vec<Subscription> = self.subscriptions.lock().await.drain(..).collect();
        for subscription in subscriptions {
            subscription.stop().await;
        }

        info!("Executor {} stopped", self.config.name);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

/// Handles one task at a time for a consume loop.
struct TaskHandler {
    name: String,
    transport: Arc<Transport>,
    digest: Arc<dyn DigestFn>,
    result_topic: String,
    cancel: CancellationToken,
}

#[async_trait]
impl MessageHandler<TaskMessage> for TaskHandler {
    async fn handle(&self, task: TaskMessage) -> HandlerOutcome {
        let space = match task.search_space() {
            Ok(space) => space,
            Err(e) => {
                TASKS_EXECUTED.with_label_values(&["invalid"]).inc();
                error!(
                    "Executor {} rejecting task for job {} part {}: {}",
                    self.name, task.job_id, task.part_number, e
                );
                return HandlerOutcome::Reject;
            }
        };

        debug!(
            "Executor {} searching job {} part {}/{} range [{}, {})",
            self.name, task.job_id, task.part_number, task.part_count, task.start, task.end
        );

        let digest = Arc::clone(&self.digest);
        let target = task.target_digest.clone();
        let (start, end) = (task.start, task.end);
        let stop = Arc::new(AtomicBool::new(false));
        let timer = TASK_DURATION.start_timer();
        let mut search = tokio::task::spawn_blocking({
            let stop = Arc::clone(&stop);
            move || execute_until(&space, digest.as_ref(), &target, start, end, &stop)
        });
        let searched = tokio::select! {
            searched = &mut search => searched,
            _ = self.cancel.cancelled() => {
                stop.store(true, Ordering::Relaxed);
                search.await
            }
        };
        timer.observe_duration();

        let matches = match searched {
            Ok(Ok(Some(matches))) => matches,
            Ok(Ok(None)) => {
                TASKS_EXECUTED.with_label_values(&["cancelled"]).inc();
                info!(
                    "Executor {} abandoned job {} part {} on shutdown",
                    self.name, task.job_id, task.part_number
                );
                return HandlerOutcome::Retry;
            }
            Ok(Err(e)) => {
                TASKS_EXECUTED.with_label_values(&["invalid"]).inc();
                error!(
                    "Executor {} failed job {} part {}: {}",
                    self.name, task.job_id, task.part_number, e
                );
                return HandlerOutcome::Reject;
            }
            Err(e) => {
                warn!(
                    "Executor {} search for job {} part {} aborted: {}",
                    self.name, task.job_id, task.part_number, e
                );
                return HandlerOutcome::Retry;
            }
        };

        let found = !matches.is_empty();
        let result = ResultMessage {
            job_id: task.job_id.clone(),
            part_number: task.part_number,
            matches,
        };

        match self
            .transport
            .publish(&self.result_topic, &result, &self.cancel)
            .await
        {
            Ok(()) => {
                let label = if found { "found" } else { "empty" };
                TASKS_EXECUTED.with_label_values(&[label]).inc();
                info!(
                    "Executor {} finished job {} part {} with {} match(es)",
                    self.name,
                    task.job_id,
                    task.part_number,
                    result.matches.len()
                );
                HandlerOutcome::Ack
            }
            Err(TransportError::Cancelled) => {
                TASKS_EXECUTED.with_label_values(&["cancelled"]).inc();
                debug!(
                    "Executor {} shutting down before reporting job {} part {}",
                    self.name, task.job_id, task.part_number
                );
                HandlerOutcome::Retry
            }
            Err(e) => {
                warn!(
                    "Executor {} could not report job {} part {}: {}",
                    self.name, task.job_id, task.part_number, e
                );
                HandlerOutcome::Retry
            }
        }
    }
}
