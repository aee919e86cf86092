//! Chat messages and their JSON wire form.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use chat_common::id::{prefix, prefixed_ulid};

use super::ValidationError;

/// The closed set of intents a message can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    GetMessages,
    ListMessages,
    CreateMessage,
    UpdateMessage,
    DeleteMessage,
    CreatePublicChannel,
    JoinPublicChannel,
    LeavePublicChannel,
    None,
}

impl Action {
    pub const ALL: [Action; 9] = [
        Action::GetMessages,
        Action::ListMessages,
        Action::CreateMessage,
        Action::UpdateMessage,
        Action::DeleteMessage,
        Action::CreatePublicChannel,
        Action::JoinPublicChannel,
        Action::LeavePublicChannel,
        Action::None,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::GetMessages => "GET_MESSAGES",
            Action::ListMessages => "LIST_MESSAGES",
            Action::CreateMessage => "CREATE_MESSAGE",
            Action::UpdateMessage => "UPDATE_MESSAGE",
            Action::DeleteMessage => "DELETE_MESSAGE",
            Action::CreatePublicChannel => "CREATE_PUBLIC_CHANNEL",
            Action::JoinPublicChannel => "JOIN_PUBLIC_CHANNEL",
            Action::LeavePublicChannel => "LEAVE_PUBLIC_CHANNEL",
            Action::None => "NONE",
        }
    }

    /// Deletes address an existing message by id; every other action
    /// carries text.
    pub fn requires_text(&self) -> bool {
        !matches!(self, Action::DeleteMessage)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidAction(s.to_string()))
    }
}

/// A validated chat message.
///
/// Fields are private so that every `Message` in circulation went through
/// [`Message::new`]. Serializes to the wire record
/// `{id, user_id, text, created_at, action, target_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    id: String,
    user_id: String,
    text: String,
    created_at: DateTime<Utc>,
    action: Action,
    /// Channel or user the message concerns.
    target_id: String,
}

impl Message {
    /// Build a message. An empty `id` is replaced with a fresh one (deletes
    /// must name theirs) and a missing `created_at` defaults to now; everything
    /// else is checked.
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        text: impl Into<String>,
        action: Action,
        target_id: impl Into<String>,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<Self, ValidationError> {
        let mut id = id.into();
        let user_id = user_id.into();
        let text = text.into();
        let target_id = target_id.into();

        if id.is_empty() {
            if action == Action::DeleteMessage {
                return Err(ValidationError::MissingField("id"));
            }
            id = prefixed_ulid(prefix::MESSAGE);
        }
        if user_id.is_empty() {
            return Err(ValidationError::MissingField("user_id"));
        }
        if text.is_empty() && action.requires_text() {
            return Err(ValidationError::MissingField("text"));
        }
        if target_id.is_empty() {
            return Err(ValidationError::MissingField("target_id"));
        }

        Ok(Self {
            id,
            user_id,
            text,
            created_at: created_at.unwrap_or_else(Utc::now),
            action,
            target_id,
        })
    }

    /// Like [`Message::new`] but with the action given as its wire string.
    pub fn parse_action(
        id: impl Into<String>,
        user_id: impl Into<String>,
        text: impl Into<String>,
        action: &str,
        target_id: impl Into<String>,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<Self, ValidationError> {
        let action = action.parse()?;
        Self::new(id, user_id, text, action, target_id, created_at)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    /// Copy of this message under a newly generated id.
    pub fn with_fresh_id(&self) -> Self {
        Self {
            id: prefixed_ulid(prefix::MESSAGE),
            ..self.clone()
        }
    }

    /// Serialize to the JSON wire record.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse and validate a wire record. Set `id`/`created_at` values survive.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        Ok(MessagePayload::parse(bytes)?.into_message()?)
    }
}

/// Error decoding a frame into a [`Message`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Unvalidated message as it arrives from a client.
///
/// Every field is optional on the wire; validation happens when the payload
/// is turned into a [`Message`].
#[derive(Debug, Default, Deserialize)]
pub struct MessagePayload {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub target_id: String,
}

impl MessagePayload {
    pub fn parse(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Validate as-is.
    pub fn into_message(self) -> Result<Message, ValidationError> {
        Message::parse_action(
            self.id,
            self.user_id,
            self.text,
            &self.action,
            self.target_id,
            self.created_at,
        )
    }

    /// Validate with the author replaced by the authenticated `user_id`.
    pub fn authored_by(mut self, user_id: &str) -> Result<Message, ValidationError> {
        self.user_id = user_id.to_string();
        self.into_message()
    }
}

/// A batch of messages addressed to one target, e.g. a channel history page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Messages {
    messages: Vec<Message>,
    action: Action,
    target_id: String,
}

impl Messages {
    pub fn new(
        messages: Vec<Message>,
        action: Action,
        target_id: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let target_id = target_id.into();
        if messages.is_empty() {
            return Err(ValidationError::MissingField("messages"));
        }
        if target_id.is_empty() {
            return Err(ValidationError::MissingField("target_id"));
        }
        Ok(Self {
            messages,
            action,
            target_id,
        })
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
