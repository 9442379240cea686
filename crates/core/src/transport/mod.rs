//! Resilient publish/consume over a durable broker.
//!
//! Delivery is at-least-once: a message is redelivered when its consumer
//! dies before acknowledging or when the handler asks for a retry. Each
//! consumer holds at most one unacknowledged delivery at a time, and keeps
//! its claim alive for as long as the handler runs. A message that keeps
//! failing is dead-lettered after a bounded number of attempts.
//!
//! Two broker backends are provided:
//! - [`SqliteBroker`]: durable queues in a SQLite file, shared across processes
//! - [`MemoryBroker`]: in-process queues for tests and standalone mode

mod backoff;
mod broker;
mod client;
mod config;
mod connection;
mod memory;
mod sqlite;
mod subscription;

pub use backoff::sleep_with_cancellation;
pub use broker::{BrokerChannel, BrokerConnector, DeadLetter, Delivery};
pub use client::Transport;
pub use config::{BrokerBackend, BrokerConfig};
pub use connection::{ConnectionState, ManagedConnection};
pub use memory::MemoryBroker;
pub use sqlite::SqliteBroker;
pub use subscription::{HandlerOutcome, MessageHandler, Subscription, DEFAULT_MAX_ATTEMPTS};

use std::sync::Arc;

use thiserror::Error;

/// Errors raised by the transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The channel or connection is gone; callers reconnect.
    #[error("broker connection lost")]
    Disconnected,

    /// Establishing a connection failed.
    #[error("failed to connect to broker: {0}")]
    ConnectFailed(String),

    /// The operation was abandoned because its cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// The topic has not been declared on this broker.
    #[error("topic not declared: {0}")]
    UnknownTopic(String),

    /// The channel already holds an unacknowledged delivery.
    #[error("prefetch limit reached on channel")]
    PrefetchExceeded,

    /// Ack or nack for a tag this channel does not hold.
    #[error("unknown delivery tag: {0}")]
    UnknownDelivery(u64),

    /// Message could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend storage failure.
    #[error("broker error: {0}")]
    Broker(String),
}

/// Factory function to create a broker connector from config.
pub fn create_connector(config: &BrokerConfig) -> Result<Arc<dyn BrokerConnector>, TransportError> {
    match config.backend {
        BrokerBackend::Memory => Ok(Arc::new(MemoryBroker::new())),
        BrokerBackend::Sqlite => Ok(Arc::new(SqliteBroker::new(
            &config.path,
            config.poll_interval(),
            config.visibility_timeout(),
        )?)),
    }
}
