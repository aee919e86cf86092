use std::collections::HashSet;

use chat_common::id::{prefix, prefixed_ulid};

use super::ValidationError;

/// A workspace: its name and the ids of every registered client.
#[derive(Debug, Clone)]
pub struct Hub {
    id: String,
    name: String,
    clients: HashSet<String>,
}

impl Hub {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Result<Self, ValidationError> {
        let mut id = id.into();
        let name = name.into();
        if id.is_empty() {
            id = prefixed_ulid(prefix::HUB);
        }
        if name.is_empty() {
            return Err(ValidationError::MissingField("name"));
        }
        Ok(Self {
            id,
            name,
            clients: HashSet::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn register_client(&mut self, client_id: &str) -> bool {
        self.clients.insert(client_id.to_string())
    }

    pub fn unregister_client(&mut self, client_id: &str) -> bool {
        self.clients.remove(client_id)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}
