//! Redis-backed bus for multi-instance deployments.

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{BusError, PubSub, Subscription};

/// Publishes over a shared multiplexed connection; each subscription gets its
/// own dedicated pub/sub connection, closed when the subscription is dropped.
pub struct RedisBus {
    client: redis::Client,
    publisher: ConnectionManager,
}

impl RedisBus {
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let client = redis::Client::open(url)?;
        let publisher = ConnectionManager::new(client.clone()).await?;
        Ok(Self { client, publisher })
    }
}

#[async_trait]
impl PubSub for RedisBus {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
        let mut conn = self.publisher.clone();
        conn.publish::<_, _, ()>(topic, payload).await?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, BusError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(topic).await?;

        let stream = pubsub
            .into_on_message()
            .map(|msg| msg.get_payload_bytes().to_vec());

        Ok(Subscription::new(topic, stream))
    }
}
