use std::sync::Arc;

use crackhash_core::{Config, JobOrchestrator, SanitizedConfig, Transport};

/// Shared application state
pub struct AppState {
    config: Config,
    config_hash: String,
    transport: Arc<Transport>,
    orchestrator: Option<Arc<JobOrchestrator>>,
}

impl AppState {
    pub fn new(
        config: Config,
        config_hash: String,
        transport: Arc<Transport>,
        orchestrator: Option<Arc<JobOrchestrator>>,
    ) -> Self {
        Self {
            config,
            config_hash,
            transport,
            orchestrator,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    /// Short fingerprint of the loaded configuration.
    pub fn config_hash(&self) -> &str {
        &self.config_hash
    }

    pub fn transport(&self) -> &Transport {
        self.transport.as_ref()
    }

    /// The job orchestrator, absent in the worker role.
    pub fn orchestrator(&self) -> Option<&Arc<JobOrchestrator>> {
        self.orchestrator.as_ref()
    }
}
