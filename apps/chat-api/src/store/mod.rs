//! Message persistence boundary.
//!
//! The gateway calls into a [`MessageStore`] before broadcasting; a failure
//! suppresses the broadcast but leaves the connection open.

pub mod memory;

use async_trait::async_trait;

use crate::entity::Message;

pub use memory::MemoryMessageStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("message {0} not found")]
    NotFound(String),
    #[error("message {0} already exists")]
    Conflict(String),
    #[error("storage backend failure: {0}")]
    Backend(String),
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create(&self, message: &Message) -> Result<(), StoreError>;
    async fn update(&self, message: &Message) -> Result<(), StoreError>;
    async fn delete(&self, message_id: &str) -> Result<(), StoreError>;
    async fn get(&self, message_id: &str) -> Result<Option<Message>, StoreError>;
    /// Messages targeting `channel_id`, oldest first.
    async fn list(&self, channel_id: &str) -> Result<Vec<Message>, StoreError>;
}
