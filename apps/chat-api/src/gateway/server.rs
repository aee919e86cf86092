//! WebSocket upgrade endpoint.

use axum::extract::{State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use crate::auth::AuthUser;
use crate::entity::Client;
use crate::error::ApiError;
use crate::AppState;

use super::register_connection;

pub fn router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

async fn ws_upgrade(
    user: AuthUser,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    if state.hub.is_stopped() {
        return Err(ApiError::unavailable("Gateway is shutting down"));
    }
    let membership = user.membership(state.hub.id())?;
    let client = Client::new("", membership.user_id.clone())?;
    let config = state.config.gateway;

    let upgrade = ws
        .max_message_size(config.max_message_size)
        .on_upgrade(move |socket| async move {
            let client_id = client.id().to_string();
            match register_connection(socket, client, state.hub.clone(), state.store.clone(), config)
            {
                Ok(_) => tracing::info!(
                    %client_id,
                    user_id = %membership.user_id,
                    name = %membership.name,
                    "client connected"
                ),
                Err(e) => tracing::warn!(%e, %client_id, "failed to register client"),
            }
        });

    Ok(upgrade.into_response())
}
