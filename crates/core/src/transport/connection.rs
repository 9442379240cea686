//! Connection state machine with fixed-backoff reconnect.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{sleep_with_cancellation, BrokerChannel, BrokerConnector, TransportError};
use crate::metrics::RECONNECTS;

/// Observable state of a [`ManagedConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Reconnecting,
}

enum Slot {
    Connected(Arc<dyn BrokerChannel>),
    Reconnecting,
}

/// A broker channel that is transparently re-established after failure.
///
/// Topics used through [`ManagedConnection::channel_for`] are remembered and
/// re-declared on every new channel.
pub struct ManagedConnection {
    connector: Arc<dyn BrokerConnector>,
    retry_delay: Duration,
    slot: tokio::sync::Mutex<Slot>,
    topics: Mutex<BTreeSet<String>>,
    connected: AtomicBool,
    ever_connected: AtomicBool,
}

impl ManagedConnection {
    pub fn new(connector: Arc<dyn BrokerConnector>, retry_delay: Duration) -> Self {
        Self {
            connector,
            retry_delay,
            slot: tokio::sync::Mutex::new(Slot::Reconnecting),
            topics: Mutex::new(BTreeSet::new()),
            connected: AtomicBool::new(false),
            ever_connected: AtomicBool::new(false),
        }
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn state(&self) -> ConnectionState {
        if self.connected.load(Ordering::SeqCst) {
            ConnectionState::Connected
        } else {
            ConnectionState::Reconnecting
        }
    }

    /// Current channel, connecting first if needed.
    ///
    /// Retries with the fixed delay until a channel is up or `cancel` fires.
    pub async fn channel(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn BrokerChannel>, TransportError> {
        let mut slot = tokio::select! {
            slot = self.slot.lock() => slot,
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
        };

        if let Slot::Connected(channel) = &*slot {
            return Ok(Arc::clone(channel));
        }

        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }
            attempt += 1;

            match self.open().await {
                Ok(channel) => {
                    if self.ever_connected.swap(true, Ordering::SeqCst) {
                        RECONNECTS.inc();
                        info!("Reconnected to broker after {} attempt(s)", attempt);
                    } else {
                        debug!("Connected to broker");
                    }
                    *slot = Slot::Connected(Arc::clone(&channel));
                    self.connected.store(true, Ordering::SeqCst);
                    return Ok(channel);
                }
                Err(e) => {
                    warn!(
                        "Broker connection attempt {} failed: {}, retrying in {:?}",
                        attempt, e, self.retry_delay
                    );
                    sleep_with_cancellation(self.retry_delay, cancel).await?;
                }
            }
        }
    }

    /// Channel with `topic` declared on it.
    pub async fn channel_for(
        &self,
        topic: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn BrokerChannel>, TransportError> {
        let known = self.topics.lock().unwrap().contains(topic);
        let channel = self.channel(cancel).await?;
        if !known {
            // Declaring is idempotent, so racing callers may both declare.
            if let Err(e) = channel.declare(topic).await {
                self.invalidate(&channel).await;
                return Err(e);
            }
            self.topics.lock().unwrap().insert(topic.to_string());
        }
        Ok(channel)
    }

    /// Drop `channel` if it is still the current one, so the next call reconnects.
    pub async fn invalidate(&self, channel: &Arc<dyn BrokerChannel>) {
        let mut slot = self.slot.lock().await;
        let current = match &*slot {
            Slot::Connected(current) => current,
            Slot::Reconnecting => return,
        };
        if !std::ptr::addr_eq(Arc::as_ptr(current), Arc::as_ptr(channel)) {
            return;
        }

        warn!("Broker channel lost, will reconnect");
        let dead = std::mem::replace(&mut *slot, Slot::Reconnecting);
        self.connected.store(false, Ordering::SeqCst);
        if let Slot::Connected(dead) = dead {
            dead.close().await;
        }
    }

    /// Close the current channel, releasing its unacknowledged deliveries.
    pub async fn close(&self) {
        let mut slot = self.slot.lock().await;
        let old = std::mem::replace(&mut *slot, Slot::Reconnecting);
        self.connected.store(false, Ordering::SeqCst);
        if let Slot::Connected(channel) = old {
            channel.close().await;
        }
    }

    async fn open(&self) -> Result<Arc<dyn BrokerChannel>, TransportError> {
        let channel = self.connector.connect().await?;
        let topics: Vec<String> = self.topics.lock().unwrap().iter().cloned().collect();
        for topic in &topics {
            if let Err(e) = channel.declare(topic).await {
                channel.close().await;
                return Err(e);
            }
        }
        Ok(channel)
    }
}
