//! Broker abstraction: connectors hand out channels, channels move messages.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::TransportError;

/// A message handed to a consumer, pending ack or nack.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Channel-scoped handle used to settle the delivery.
    pub tag: u64,
    pub topic: String,
    pub payload: Vec<u8>,
    /// How many times this message has been delivered, including this one.
    pub attempts: u32,
}

/// A message dropped by a consumer as unprocessable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Opens channels to a broker.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Open a new channel. Fails if the broker is unreachable.
    async fn connect(&self) -> Result<Arc<dyn BrokerChannel>, TransportError>;
}

/// A live channel to the broker.
///
/// Once a channel has failed every call returns
/// [`TransportError::Disconnected`], and the broker returns the channel's
/// unacknowledged deliveries to the head of their queues.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Create a durable topic queue if it does not exist.
    async fn declare(&self, topic: &str) -> Result<(), TransportError>;

    /// Append a message to a declared topic.
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;

    /// Wait for the next message on a topic.
    ///
    /// A channel holds at most one unacknowledged delivery; asking for
    /// another before settling the first fails with
    /// [`TransportError::PrefetchExceeded`].
    async fn next_delivery(&self, topic: &str) -> Result<Delivery, TransportError>;

    /// Keep a delivery claimed by this channel for another lease period.
    ///
    /// Fails with [`TransportError::UnknownDelivery`] once the channel no
    /// longer holds it.
    async fn extend(&self, tag: u64) -> Result<(), TransportError>;

    /// How long a delivery stays claimed without [`BrokerChannel::extend`].
    /// `None` when claims only end with the channel.
    fn lease(&self) -> Option<Duration> {
        None
    }

    /// Acknowledge a delivery, removing the message.
    async fn ack(&self, tag: u64) -> Result<(), TransportError>;

    /// Negative-acknowledge a delivery. With `requeue` the message goes back
    /// to the head of its queue, otherwise it is dead-lettered.
    async fn nack(&self, tag: u64, requeue: bool) -> Result<(), TransportError>;

    /// Close the channel, returning unacknowledged deliveries to their queues.
    async fn close(&self);
}
