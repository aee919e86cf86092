//! Distributed publish/subscribe bus used to fan channel messages out across
//! service instances.
//!
//! A channel's messages are published to the topic named after the channel
//! id. Every instance, the publishing one included, receives them back through
//! its own subscription; local delivery happens only on that path.

pub mod memory;
pub mod redis_bus;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};

pub use memory::MemoryBus;
pub use redis_bus::RedisBus;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("redis: {0}")]
    Redis(#[from] ::redis::RedisError),
}

#[async_trait]
pub trait PubSub: Send + Sync {
    /// Fire-and-forget publish. At-least-once delivery is acceptable.
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError>;

    /// Open a long-lived subscription. Every payload published to `topic`
    /// after this returns is observable on the subscription.
    async fn subscribe(&self, topic: &str) -> Result<Subscription, BusError>;
}

/// A live subscription to one topic. Dropping it (or calling
/// [`Subscription::close`]) releases the underlying resource.
pub struct Subscription {
    topic: String,
    stream: BoxStream<'static, Vec<u8>>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, stream: impl Stream<Item = Vec<u8>> + Send + 'static) -> Self {
        Self {
            topic: topic.into(),
            stream: stream.boxed(),
        }
    }

    /// Next payload, or `None` once the bus side has gone away.
    pub async fn next(&mut self) -> Option<Vec<u8>> {
        self.stream.next().await
    }

    pub fn close(self) {
        tracing::debug!(topic = %self.topic, "bus subscription released");
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}
