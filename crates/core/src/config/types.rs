use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::executor::ExecutorConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::transport::{BrokerBackend, BrokerConfig};

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

/// Which components this process runs.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Orchestrator and HTTP API.
    Manager,
    /// Task executor only.
    Worker,
    /// Everything in one process.
    #[default]
    Standalone,
}

impl Role {
    pub fn runs_orchestrator(&self) -> bool {
        matches!(self, Role::Manager | Role::Standalone)
    }

    pub fn runs_executor(&self) -> bool {
        matches!(self, Role::Worker | Role::Standalone)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Manager => "manager",
            Role::Worker => "worker",
            Role::Standalone => "standalone",
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Job store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("crackhash.db")
}

/// Sanitized config for API responses (file locations left out)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub role: String,
    pub server: ServerConfig,
    pub broker: SanitizedBrokerConfig,
    pub orchestrator: SanitizedOrchestratorConfig,
    pub executor: ExecutorConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedBrokerConfig {
    pub backend: String,
    pub task_topic: String,
    pub result_topic: String,
    pub retry_delay_secs: u64,
    pub visibility_timeout_secs: u64,
    pub max_delivery_attempts: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedOrchestratorConfig {
    pub worker_count: u32,
    pub job_timeout_secs: u64,
    pub alphabet: String,
    pub max_length_limit: u32,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            role: config.role.as_str().to_string(),
            server: config.server.clone(),
            broker: SanitizedBrokerConfig {
                backend: match config.broker.backend {
                    BrokerBackend::Sqlite => "sqlite".to_string(),
                    BrokerBackend::Memory => "memory".to_string(),
                },
                task_topic: config.broker.task_topic.clone(),
                result_topic: config.broker.result_topic.clone(),
                retry_delay_secs: config.broker.retry_delay_secs,
                visibility_timeout_secs: config.broker.visibility_timeout_secs,
                max_delivery_attempts: config.broker.max_delivery_attempts,
            },
            orchestrator: SanitizedOrchestratorConfig {
                worker_count: config.orchestrator.worker_count,
                job_timeout_secs: config.orchestrator.job_timeout_secs,
                alphabet: config.orchestrator.alphabet.as_string(),
                max_length_limit: config.orchestrator.max_length_limit,
            },
            executor: config.executor.clone(),
        }
    }
}
