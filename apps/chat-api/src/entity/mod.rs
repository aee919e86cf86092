//! Chat domain value objects.
//!
//! Every constructor validates its input and either returns a complete value
//! or a [`ValidationError`]; nothing partially built escapes.

pub mod channel;
pub mod client;
pub mod hub;
pub mod membership;
pub mod message;

pub use channel::Channel;
pub use client::Client;
pub use hub::Hub;
pub use membership::Membership;
pub use message::{Action, DecodeError, Message, MessagePayload, Messages};

/// Rejection raised while constructing an entity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("invalid action: {0:?}")]
    InvalidAction(String),
}
