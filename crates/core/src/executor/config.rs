//! Configuration for the task executor.

use serde::{Deserialize, Serialize};

/// Configuration for the task executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Name used in logs to tell executors apart.
    #[serde(default = "default_name")]
    pub name: String,

    /// Parallel consume loops in this process. Each holds at most one task.
    #[serde(default = "default_consumers")]
    pub consumers: usize,
}

fn default_name() -> String {
    "worker".to_string()
}

fn default_consumers() -> usize {
    1
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            consumers: default_consumers(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ExecutorConfig::default();
        assert_eq!(config.name, "worker");
        assert_eq!(config.consumers, 1);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: ExecutorConfig = toml::from_str("consumers = 4").unwrap();
        assert_eq!(config.consumers, 4);
        assert_eq!(config.name, "worker");
    }
}
