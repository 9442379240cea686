//! Publish/subscribe entry point.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    sleep_with_cancellation, BrokerConnector, ConnectionState, ManagedConnection, MessageHandler,
    Subscription, TransportError, DEFAULT_MAX_ATTEMPTS,
};
use crate::metrics::PUBLISH_RETRIES;

/// Resilient publish/subscribe client.
///
/// Publishing shares one managed connection; every subscription gets its
/// own, so a slow consumer never blocks publishers.
pub struct Transport {
    connector: Arc<dyn BrokerConnector>,
    publisher: ManagedConnection,
    retry_delay: Duration,
    max_attempts: u32,
}

impl Transport {
    pub fn new(connector: Arc<dyn BrokerConnector>, retry_delay: Duration) -> Self {
        Self {
            publisher: ManagedConnection::new(Arc::clone(&connector), retry_delay),
            connector,
            retry_delay,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Deliveries a consumer makes of one message before dead-lettering it
    /// when its handler keeps asking for a retry.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// State of the publishing connection.
    pub fn state(&self) -> ConnectionState {
        self.publisher.state()
    }

    /// Publish a message as JSON.
    ///
    /// Transport failures are retried with the fixed delay, reconnecting as
    /// needed, so this may block for a long time. Only cancellation or an
    /// unserializable message ends it with an error.
    pub async fn publish<T>(
        &self,
        topic: &str,
        message: &T,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_vec(message)?;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let channel = self.publisher.channel_for(topic, cancel).await;
            let result = match &channel {
                Ok(channel) => channel.publish(topic, &payload).await,
                Err(TransportError::Cancelled) => return Err(TransportError::Cancelled),
                Err(_) => Err(TransportError::Disconnected),
            };

            match result {
                Ok(()) => {
                    debug!("Published {} bytes to {}", payload.len(), topic);
                    return Ok(());
                }
                Err(e) => {
                    PUBLISH_RETRIES.with_label_values(&[topic]).inc();
                    warn!(
                        "Publish to {} failed (attempt {}): {}, retrying in {:?}",
                        topic, attempt, e, self.retry_delay
                    );
                    if let Ok(channel) = &channel {
                        self.publisher.invalidate(channel).await;
                    }
                    sleep_with_cancellation(self.retry_delay, cancel).await?;
                }
            }
        }
    }

    /// Start consuming `topic`, one message at a time, until `cancel` fires.
    ///
    /// Undecodable payloads are rejected without reaching the handler. A
    /// retried message is requeued after the retry delay and dead-lettered
    /// once it has been delivered `max_attempts` times.
    pub fn subscribe<T, H>(
        &self,
        topic: &str,
        handler: Arc<H>,
        cancel: CancellationToken,
    ) -> Subscription
    where
        T: DeserializeOwned + Send + 'static,
        H: MessageHandler<T> + 'static,
    {
        let connection = ManagedConnection::new(Arc::clone(&self.connector), self.retry_delay);
        Subscription::spawn(
            topic.to_string(),
            connection,
            handler,
            self.max_attempts,
            cancel,
        )
    }

    /// Close the publishing connection.
    pub async fn close(&self) {
        self.publisher.close().await;
    }
}
