use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{MessageStore, StoreError};
use crate::entity::Message;

/// In-memory message store for single-instance deployments and tests.
pub struct MemoryMessageStore {
    messages: RwLock<HashMap<String, Message>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self {
            messages: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }
}

impl Default for MemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn create(&self, message: &Message) -> Result<(), StoreError> {
        let mut messages = self.messages.write();
        if messages.contains_key(message.id()) {
            return Err(StoreError::Conflict(message.id().to_string()));
        }
        messages.insert(message.id().to_string(), message.clone());
        Ok(())
    }

    async fn update(&self, message: &Message) -> Result<(), StoreError> {
        let mut messages = self.messages.write();
        match messages.get_mut(message.id()) {
            Some(existing) => {
                *existing = message.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(message.id().to_string())),
        }
    }

    async fn delete(&self, message_id: &str) -> Result<(), StoreError> {
        self.messages
            .write()
            .remove(message_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(message_id.to_string()))
    }

    async fn get(&self, message_id: &str) -> Result<Option<Message>, StoreError> {
        Ok(self.messages.read().get(message_id).cloned())
    }

    async fn list(&self, channel_id: &str) -> Result<Vec<Message>, StoreError> {
        let mut list: Vec<Message> = self
            .messages
            .read()
            .values()
            .filter(|m| m.target_id() == channel_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.created_at().cmp(&b.created_at()).then_with(|| a.id().cmp(b.id())));
        Ok(list)
    }
}
