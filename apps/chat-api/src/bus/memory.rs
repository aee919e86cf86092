//! In-process bus for single-instance deployments and tests.

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::{BusError, PubSub, Subscription};

/// Per-topic buffer. Subscribers further behind than this skip messages.
pub const DEFAULT_TOPIC_CAPACITY: usize = 1024;

/// Topic registry backed by one `broadcast` channel per topic.
pub struct MemoryBus {
    topics: DashMap<String, broadcast::Sender<Vec<u8>>>,
    capacity: usize,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TOPIC_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            capacity,
        }
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSub for MemoryBus {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
        let delivered = match self.topics.get(topic) {
            Some(tx) => tx.send(payload.to_vec()).is_ok(),
            None => false,
        };
        if !delivered {
            // Nobody listening: forget the topic so dead channels don't pile up.
            self.topics
                .remove_if(topic, |_, tx| tx.receiver_count() == 0);
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, BusError> {
        let rx = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        let stream = futures_util::stream::unfold(
            (rx, topic.to_string()),
            |(mut rx, topic)| async move {
                loop {
                    match rx.recv().await {
                        Ok(payload) => return Some((payload, (rx, topic))),
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(%topic, skipped, "bus subscription lagged");
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            },
        );

        Ok(Subscription::new(topic, stream))
    }
}
