use super::{types::Config, ConfigError};
use crate::engine::SearchSpace;
use crate::transport::BrokerBackend;

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Orchestrator worker count, timeout and length limit are positive
/// - The largest allowed search space fits in a u64 index
/// - Task and result topics are set and distinct
/// - At least one executor consumer
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Server validation
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    // Orchestrator validation
    let orchestrator = &config.orchestrator;
    if orchestrator.worker_count == 0 {
        return Err(ConfigError::ValidationError(
            "orchestrator.worker_count must be greater than 0".to_string(),
        ));
    }
    if orchestrator.job_timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "orchestrator.job_timeout_secs must be greater than 0".to_string(),
        ));
    }
    if orchestrator.max_length_limit == 0 {
        return Err(ConfigError::ValidationError(
            "orchestrator.max_length_limit must be greater than 0".to_string(),
        ));
    }
    SearchSpace::new(orchestrator.alphabet.clone(), orchestrator.max_length_limit).map_err(
        |e| ConfigError::ValidationError(format!("orchestrator.max_length_limit: {}", e)),
    )?;

    // Broker validation
    let broker = &config.broker;
    if broker.task_topic.trim().is_empty() || broker.result_topic.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "broker topics cannot be empty".to_string(),
        ));
    }
    if broker.task_topic == broker.result_topic {
        return Err(ConfigError::ValidationError(format!(
            "broker.task_topic and broker.result_topic are both '{}'",
            broker.task_topic
        )));
    }
    if broker.backend == BrokerBackend::Sqlite && broker.visibility_timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "broker.visibility_timeout_secs must be greater than 0".to_string(),
        ));
    }
    if broker.max_delivery_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "broker.max_delivery_attempts must be greater than 0".to_string(),
        ));
    }

    // Executor validation
    if config.executor.consumers == 0 {
        return Err(ConfigError::ValidationError(
            "executor.consumers must be greater than 0".to_string(),
        ));
    }

    Ok(())
}
