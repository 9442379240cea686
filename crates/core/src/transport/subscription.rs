//! Consumer side: handler trait and the consume loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{sleep_with_cancellation, BrokerChannel, Delivery, ManagedConnection, TransportError};
use crate::metrics::DELIVERIES_ABANDONED;

/// Deliveries of one message before a retrying handler gives up on it.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// What a handler wants done with the message it was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Processed; remove the message.
    Ack,
    /// Transient failure; redeliver after the retry delay, up to the
    /// attempt limit.
    Retry,
    /// Unprocessable; drop it to the dead-letter store.
    Reject,
}

/// Processes decoded messages from a topic.
#[async_trait]
pub trait MessageHandler<T>: Send + Sync {
    async fn handle(&self, message: T) -> HandlerOutcome;
}

/// Handle to a running consume loop.
pub struct Subscription {
    topic: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Subscription {
    pub(super) fn spawn<T, H>(
        topic: String,
        connection: ManagedConnection,
        handler: Arc<H>,
        max_attempts: u32,
        cancel: CancellationToken,
    ) -> Self
    where
        T: DeserializeOwned + Send + 'static,
        H: MessageHandler<T> + 'static,
    {
        let loop_topic = topic.clone();
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            consume_loop(loop_topic, connection, handler, max_attempts, loop_cancel).await;
        });

        Self {
            topic,
            cancel,
            handle,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop consuming and wait for the loop to release its channel.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            error!("Consumer for {} ended abnormally: {}", self.topic, e);
        }
    }
}

async fn consume_loop<T, H>(
    topic: String,
    connection: ManagedConnection,
    handler: Arc<H>,
    max_attempts: u32,
    cancel: CancellationToken,
) where
    T: DeserializeOwned + Send + 'static,
    H: MessageHandler<T> + 'static,
{
    info!("Consumer for {} started", topic);
    let retry_delay = connection.retry_delay();

    loop {
        let channel = match connection.channel_for(&topic, &cancel).await {
            Ok(channel) => channel,
            Err(TransportError::Cancelled) => break,
            Err(e) => {
                warn!("Failed to prepare consumer for {}: {}", topic, e);
                if sleep_with_cancellation(retry_delay, &cancel).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let delivery = tokio::select! {
            _ = cancel.cancelled() => break,
            delivery = channel.next_delivery(&topic) => delivery,
        };

        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(e) => {
                warn!("Consumer for {} lost its channel: {}", topic, e);
                connection.invalidate(&channel).await;
                continue;
            }
        };

        let tag = delivery.tag;
        let attempts = delivery.attempts;
        let outcome = hold(&channel, tag, dispatch(&topic, &handler, delivery)).await;

        let outcome = match outcome {
            // Closing the connection below hands it back untouched.
            HandlerOutcome::Retry if cancel.is_cancelled() => break,
            HandlerOutcome::Retry if attempts >= max_attempts => {
                DELIVERIES_ABANDONED
                    .with_label_values(&[topic.as_str()])
                    .inc();
                error!(
                    "Giving up on delivery {} on {} after {} attempt(s)",
                    tag, topic, attempts
                );
                HandlerOutcome::Reject
            }
            HandlerOutcome::Retry => {
                // Requeueing puts it back at the head, so wait while still holding it.
                let delay = sleep_with_cancellation(retry_delay, &cancel);
                if hold(&channel, tag, delay).await.is_err() {
                    break;
                }
                HandlerOutcome::Retry
            }
            other => other,
        };

        let settled = match outcome {
            HandlerOutcome::Ack => channel.ack(tag).await,
            HandlerOutcome::Retry => channel.nack(tag, true).await,
            HandlerOutcome::Reject => channel.nack(tag, false).await,
        };
        if let Err(e) = settled {
            // The broker hands the message to someone else once our channel is gone.
            warn!("Failed to settle delivery {} on {}: {}", tag, topic, e);
            connection.invalidate(&channel).await;
        }
    }

    connection.close().await;
    info!("Consumer for {} stopped", topic);
}

/// Run `work` while keeping delivery `tag` claimed on `channel`.
async fn hold<F>(channel: &Arc<dyn BrokerChannel>, tag: u64, work: F) -> F::Output
where
    F: Future,
{
    let Some(lease) = channel.lease() else {
        return work.await;
    };

    let period = (lease / 3).max(Duration::from_millis(1));
    let mut renew = interval_at(Instant::now() + period, period);
    renew.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(work);

    loop {
        tokio::select! {
            output = &mut work => return output,
            _ = renew.tick() => match channel.extend(tag).await {
                Ok(()) => trace!("Renewed lease on delivery {}", tag),
                Err(e) => warn!("Failed to renew lease on delivery {}: {}", tag, e),
            },
        }
    }
}

async fn dispatch<T, H>(topic: &str, handler: &Arc<H>, delivery: Delivery) -> HandlerOutcome
where
    T: DeserializeOwned + Send + 'static,
    H: MessageHandler<T> + 'static,
{
    let message: T = match serde_json::from_slice(&delivery.payload) {
        Ok(message) => message,
        Err(e) => {
            warn!(
                "Rejecting undecodable message on {} (delivery {}): {}",
                topic, delivery.tag, e
            );
            return HandlerOutcome::Reject;
        }
    };

    debug!(
        "Handling delivery {} on {} (attempt {})",
        delivery.tag, topic, delivery.attempts
    );

    // Run in its own task so a panicking handler cannot take the loop down.
    let handler = Arc::clone(handler);
    match tokio::spawn(async move { handler.handle(message).await }).await {
        Ok(outcome) => {
            if outcome == HandlerOutcome::Reject {
                warn!("Handler rejected delivery {} on {}", delivery.tag, topic);
            }
            outcome
        }
        Err(e) => {
            error!(
                "Handler for {} failed on delivery {}: {}",
                topic, delivery.tag, e
            );
            HandlerOutcome::Retry
        }
    }
}
