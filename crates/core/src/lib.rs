pub mod config;
pub mod engine;
pub mod executor;
pub mod job;
pub mod messages;
pub mod metrics;
pub mod orchestrator;
pub mod testing;
pub mod transport;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, Role,
    SanitizedConfig,
};
pub use engine::{
    execute, execute_until, part_range, partition, Alphabet, DigestFn, EngineError, Md5Digest,
    SearchSpace,
};
pub use executor::{ExecutorConfig, TaskExecutor};
pub use job::{Job, JobError, JobFilter, JobStatus, JobStore, SqliteJobStore};
pub use messages::{InvalidTask, ResultMessage, TaskMessage};
pub use orchestrator::{
    JobOrchestrator, JobProgress, OrchestratorConfig, OrchestratorError, OrchestratorSummary,
    RecoveryReport, ResultOutcome,
};
pub use transport::{
    create_connector, BrokerBackend, BrokerConfig, ConnectionState, MemoryBroker, SqliteBroker,
    Transport, TransportError,
};
