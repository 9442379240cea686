//! Message handler that records what it receives.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::transport::{HandlerOutcome, MessageHandler};

/// Records every message and answers with a fixed outcome.
///
/// Subscribe it to a topic to observe what other components publish.
#[derive(Debug)]
pub struct RecordingHandler<T> {
    received: Mutex<Vec<T>>,
    outcome: HandlerOutcome,
}

impl<T> Default for RecordingHandler<T> {
    fn default() -> Self {
        Self::new(HandlerOutcome::Ack)
    }
}

impl<T> RecordingHandler<T> {
    pub fn new(outcome: HandlerOutcome) -> Self {
        Self {
            received: Mutex::new(Vec::new()),
            outcome,
        }
    }

    pub fn count(&self) -> usize {
        self.received.lock().unwrap().len()
    }
}

impl<T: Clone> RecordingHandler<T> {
    /// Messages received so far, in delivery order.
    pub fn received(&self) -> Vec<T> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl<T: Send + 'static> MessageHandler<T> for RecordingHandler<T> {
    async fn handle(&self, message: T) -> HandlerOutcome {
        self.received.lock().unwrap().push(message);
        self.outcome
    }
}
