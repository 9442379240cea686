//! In-process broker with the same delivery semantics as the durable one.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{BrokerChannel, BrokerConnector, DeadLetter, Delivery, TransportError};

#[derive(Debug, Clone)]
struct StoredMessage {
    payload: Vec<u8>,
    attempts: u32,
}

#[derive(Debug)]
struct InFlight {
    channel: u64,
    topic: String,
    message: StoredMessage,
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: HashMap<String, VecDeque<StoredMessage>>,
    in_flight: HashMap<u64, InFlight>,
    dead_letters: Vec<DeadLetter>,
    live_channels: HashSet<u64>,
    next_channel: u64,
    next_tag: u64,
}

impl BrokerState {
    /// Return every delivery held by `channel` to the head of its queue.
    fn requeue_channel(&mut self, channel: u64) {
        let mut tags: Vec<u64> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.channel == channel)
            .map(|(tag, _)| *tag)
            .collect();
        // Push back newest first so the oldest ends up at the head.
        tags.sort_unstable_by(|a, b| b.cmp(a));
        for tag in tags {
            if let Some(flight) = self.in_flight.remove(&tag) {
                self.requeue(flight);
            }
        }
    }

    fn requeue(&mut self, flight: InFlight) {
        self.queues
            .entry(flight.topic)
            .or_default()
            .push_front(flight.message);
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<BrokerState>,
    notify: Notify,
    failing_connects: AtomicUsize,
}

/// In-memory broker.
///
/// Queues outlive channels, so severing every connection and reconnecting
/// replays whatever is still held, like a durable broker would.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill every live channel, as if the broker connection dropped.
    pub fn sever(&self) {
        let mut state = self.inner.state.lock().unwrap();
        let channels: Vec<u64> = state.live_channels.drain().collect();
        for channel in channels {
            state.requeue_channel(channel);
        }
        drop(state);
        self.inner.notify.notify_waiters();
    }

    /// Make the next `n` connect attempts fail.
    pub fn fail_connects(&self, n: usize) {
        self.inner.failing_connects.store(n, Ordering::SeqCst);
    }

    /// Messages that consumers rejected.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.state.lock().unwrap().dead_letters.clone()
    }

    /// Messages waiting for delivery on a topic.
    pub fn pending(&self, topic: &str) -> usize {
        self.inner
            .state
            .lock()
            .unwrap()
            .queues
            .get(topic)
            .map(|q| q.len())
            .unwrap_or(0)
    }

    /// Deliveries handed out but not yet settled.
    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().unwrap().in_flight.len()
    }

    /// Payloads waiting on a topic, head first.
    pub fn peek(&self, topic: &str) -> Vec<Vec<u8>> {
        self.inner
            .state
            .lock()
            .unwrap()
            .queues
            .get(topic)
            .map(|q| q.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BrokerConnector for MemoryBroker {
    async fn connect(&self) -> Result<Arc<dyn BrokerChannel>, TransportError> {
        let failing = self.inner.failing_connects.load(Ordering::SeqCst);
        if failing > 0 {
            self.inner
                .failing_connects
                .store(failing - 1, Ordering::SeqCst);
            return Err(TransportError::ConnectFailed(
                "memory broker refused connection".to_string(),
            ));
        }

        let mut state = self.inner.state.lock().unwrap();
        state.next_channel += 1;
        let id = state.next_channel;
        state.live_channels.insert(id);

        Ok(Arc::new(MemoryChannel {
            id,
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MemoryChannel {
    id: u64,
    inner: Arc<Inner>,
}

impl MemoryChannel {
    fn with_state<T>(
        &self,
        f: impl FnOnce(&mut BrokerState) -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        let mut state = self.inner.state.lock().unwrap();
        if !state.live_channels.contains(&self.id) {
            return Err(TransportError::Disconnected);
        }
        f(&mut state)
    }

    fn take_in_flight(state: &mut BrokerState, channel: u64, tag: u64) -> Result<InFlight, TransportError> {
        match state.in_flight.get(&tag) {
            Some(flight) if flight.channel == channel => {}
            _ => return Err(TransportError::UnknownDelivery(tag)),
        }
        state
            .in_flight
            .remove(&tag)
            .ok_or(TransportError::UnknownDelivery(tag))
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn declare(&self, topic: &str) -> Result<(), TransportError> {
        self.with_state(|state| {
            state.queues.entry(topic.to_string()).or_default();
            Ok(())
        })
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.with_state(|state| {
            let queue = state
                .queues
                .get_mut(topic)
                .ok_or_else(|| TransportError::UnknownTopic(topic.to_string()))?;
            queue.push_back(StoredMessage {
                payload: payload.to_vec(),
                attempts: 0,
            });
            Ok(())
        })?;
        self.inner.notify.notify_waiters();
        Ok(())
    }

    async fn next_delivery(&self, topic: &str) -> Result<Delivery, TransportError> {
        loop {
            // Register interest before checking, so a publish in between is not missed.
            let notified = self.inner.notify.notified();

            let delivery = self.with_state(|state| {
                if state.in_flight.values().any(|f| f.channel == self.id) {
                    return Err(TransportError::PrefetchExceeded);
                }
                let queue = state
                    .queues
                    .get_mut(topic)
                    .ok_or_else(|| TransportError::UnknownTopic(topic.to_string()))?;
                let Some(mut message) = queue.pop_front() else {
                    return Ok(None);
                };

                message.attempts += 1;
                state.next_tag += 1;
                let tag = state.next_tag;
                let delivery = Delivery {
                    tag,
                    topic: topic.to_string(),
                    payload: message.payload.clone(),
                    attempts: message.attempts,
                };
                state.in_flight.insert(
                    tag,
                    InFlight {
                        channel: self.id,
                        topic: topic.to_string(),
                        message,
                    },
                );
                Ok(Some(delivery))
            })?;

            if let Some(delivery) = delivery {
                return Ok(delivery);
            }
            notified.await;
        }
    }

    async fn extend(&self, tag: u64) -> Result<(), TransportError> {
        self.with_state(|state| match state.in_flight.get(&tag) {
            Some(flight) if flight.channel == self.id => Ok(()),
            _ => Err(TransportError::UnknownDelivery(tag)),
        })
    }

    async fn ack(&self, tag: u64) -> Result<(), TransportError> {
        self.with_state(|state| Self::take_in_flight(state, self.id, tag).map(|_| ()))
    }

    async fn nack(&self, tag: u64, requeue: bool) -> Result<(), TransportError> {
        self.with_state(|state| {
            let flight = Self::take_in_flight(state, self.id, tag)?;
            if requeue {
                state.requeue(flight);
            } else {
                state.dead_letters.push(DeadLetter {
                    topic: flight.topic,
                    payload: flight.message.payload,
                });
            }
            Ok(())
        })?;
        if requeue {
            self.inner.notify.notify_waiters();
        }
        Ok(())
    }

    async fn close(&self) {
        let mut state = self.inner.state.lock().unwrap();
        if state.live_channels.remove(&self.id) {
            state.requeue_channel(self.id);
        }
        drop(state);
        self.inner.notify.notify_waiters();
    }
}
