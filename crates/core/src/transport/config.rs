//! Broker and transport configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::DEFAULT_MAX_ATTEMPTS;

/// Available broker backends.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BrokerBackend {
    /// Durable queues in a SQLite file.
    #[default]
    Sqlite,
    /// In-process queues; only usable when every role runs in one process.
    Memory,
}

/// Configuration for the message broker and transport retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub backend: BrokerBackend,

    /// Queue database path (sqlite backend).
    #[serde(default = "default_broker_path")]
    pub path: PathBuf,

    /// Topic carrying part tasks to executors.
    #[serde(default = "default_task_topic")]
    pub task_topic: String,

    /// Topic carrying part results back to the orchestrator.
    #[serde(default = "default_result_topic")]
    pub result_topic: String,

    /// Fixed delay between reconnect and publish attempts (seconds).
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// How often an idle consumer polls for new messages (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Unacknowledged deliveries are redelivered after this long (seconds).
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,

    /// Deliveries of a failing message before it is dead-lettered.
    #[serde(default = "default_max_delivery_attempts")]
    pub max_delivery_attempts: u32,
}

fn default_broker_path() -> PathBuf {
    PathBuf::from("crackhash-broker.db")
}

fn default_task_topic() -> String {
    "crack_hash_tasks".to_string()
}

fn default_result_topic() -> String {
    "crack_hash_results".to_string()
}

fn default_retry_delay() -> u64 {
    15
}

fn default_poll_interval() -> u64 {
    200
}

fn default_visibility_timeout() -> u64 {
    600 // 10 minutes
}

fn default_max_delivery_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl BrokerConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            backend: BrokerBackend::default(),
            path: default_broker_path(),
            task_topic: default_task_topic(),
            result_topic: default_result_topic(),
            retry_delay_secs: default_retry_delay(),
            poll_interval_ms: default_poll_interval(),
            visibility_timeout_secs: default_visibility_timeout(),
            max_delivery_attempts: default_max_delivery_attempts(),
        }
    }
}
