use std::collections::HashSet;

use chat_common::id::{prefix, prefixed_ulid};

use super::ValidationError;

/// A connected client: one physical connection of an authenticated user.
///
/// Channels are tracked by id; the hub resolves them through its registry.
#[derive(Debug, Clone)]
pub struct Client {
    id: String,
    user_id: String,
    channels: HashSet<String>,
}

impl Client {
    pub fn new(id: impl Into<String>, user_id: impl Into<String>) -> Result<Self, ValidationError> {
        let mut id = id.into();
        let user_id = user_id.into();
        if id.is_empty() {
            id = prefixed_ulid(prefix::CLIENT);
        }
        if user_id.is_empty() {
            return Err(ValidationError::MissingField("user_id"));
        }
        Ok(Self {
            id,
            user_id,
            channels: HashSet::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Returns `false` if already joined.
    pub fn join_channel(&mut self, channel_id: &str) -> bool {
        self.channels.insert(channel_id.to_string())
    }

    /// Returns `false` if not joined.
    pub fn leave_channel(&mut self, channel_id: &str) -> bool {
        self.channels.remove(channel_id)
    }

    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(String::as_str)
    }
}
