pub mod auth;
pub mod bus;
pub mod config;
pub mod entity;
pub mod error;
pub mod gateway;
pub mod routes;
pub mod store;

use std::sync::Arc;

use config::Config;
use gateway::HubHandle;
use store::MessageStore;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub store: Arc<dyn MessageStore>,
    pub config: Arc<Config>,
}
