//! Channel directory endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::entity::{Action, Channel, Message, Messages};
use crate::error::{ApiError, FieldError};
use crate::gateway::ChannelHandle;
use crate::AppState;

const MAX_NAME_LEN: usize = 100;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/channels", post(create_channel).get(list_channels))
        .route("/channels/{id}/messages", get(list_messages))
}

/// Public view of a running channel.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
    pub private: bool,
    pub member_count: usize,
}

impl ChannelInfo {
    async fn from_handle(channel: &ChannelHandle) -> Result<Self, ApiError> {
        Ok(Self {
            id: channel.id().to_string(),
            name: channel.name().to_string(),
            private: channel.is_private(),
            member_count: channel.member_ids().await?.len(),
        })
    }
}

// ---------------------------------------------------------------------------
// POST /api/v1/channels
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateChannelRequest {
    pub name: String,
    #[serde(default)]
    pub private: bool,
}

async fn create_channel(
    AuthUser { user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Json(body): Json<CreateChannelRequest>,
) -> Result<(StatusCode, Json<ChannelInfo>), ApiError> {
    let name = body.name.trim().to_string();
    let mut errors = Vec::new();
    if name.is_empty() {
        errors.push(FieldError {
            field: "name".to_string(),
            message: "Channel name is required".to_string(),
        });
    } else if name.len() > MAX_NAME_LEN {
        errors.push(FieldError {
            field: "name".to_string(),
            message: "Channel name must be 100 characters or fewer".to_string(),
        });
    }
    if !errors.is_empty() {
        return Err(ApiError::validation(errors));
    }

    let channel = Channel::new("", name, body.private)?;
    let handle = state.hub.register_channel(channel).await?;
    tracing::info!(channel_id = %handle.id(), name = %handle.name(), %user_id, "channel created");

    Ok((StatusCode::CREATED, Json(ChannelInfo::from_handle(&handle).await?)))
}

// ---------------------------------------------------------------------------
// GET /api/v1/channels
// ---------------------------------------------------------------------------

async fn list_channels(
    _user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<ChannelInfo>>, ApiError> {
    let mut channels = Vec::new();
    for handle in state.hub.channels().await? {
        channels.push(ChannelInfo::from_handle(&handle).await?);
    }
    channels.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Json(channels))
}

// ---------------------------------------------------------------------------
// GET /api/v1/channels/:id/messages
// ---------------------------------------------------------------------------

/// Channel history. Mirrors [`Messages`] but tolerates an empty page.
#[derive(Debug, Serialize)]
pub struct ListMessagesResponse {
    pub messages: Vec<Message>,
    pub action: Action,
    pub target_id: String,
}

impl From<Messages> for ListMessagesResponse {
    fn from(batch: Messages) -> Self {
        Self {
            action: batch.action(),
            target_id: batch.target_id().to_string(),
            messages: batch.messages().to_vec(),
        }
    }
}

async fn list_messages(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
) -> Result<Json<ListMessagesResponse>, ApiError> {
    state
        .hub
        .find_channel_by_id(&channel_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Channel not found"))?;

    let messages = state.store.list(&channel_id).await?;
    if messages.is_empty() {
        return Ok(Json(ListMessagesResponse {
            messages,
            action: Action::ListMessages,
            target_id: channel_id,
        }));
    }

    let batch = Messages::new(messages, Action::ListMessages, channel_id)?;
    Ok(Json(batch.into()))
}
