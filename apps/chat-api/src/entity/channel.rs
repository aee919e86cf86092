use std::collections::HashSet;

use chat_common::id::{prefix, prefixed_ulid};

use super::ValidationError;

/// A named chat room and the ids of its member clients.
///
/// Membership is only ever mutated by the channel's manager loop.
#[derive(Debug, Clone)]
pub struct Channel {
    id: String,
    name: String,
    private: bool,
    members: HashSet<String>,
}

impl Channel {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        private: bool,
    ) -> Result<Self, ValidationError> {
        let mut id = id.into();
        let name = name.into();
        if id.is_empty() {
            id = prefixed_ulid(prefix::CHANNEL);
        }
        if name.is_empty() {
            return Err(ValidationError::MissingField("name"));
        }
        Ok(Self {
            id,
            name,
            private,
            members: HashSet::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_private(&self) -> bool {
        self.private
    }

    /// Returns `false` if the client was already a member.
    pub fn register(&mut self, client_id: &str) -> bool {
        self.members.insert(client_id.to_string())
    }

    /// Returns `false` if the client was not a member.
    pub fn unregister(&mut self, client_id: &str) -> bool {
        self.members.remove(client_id)
    }

    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(String::as_str)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}
