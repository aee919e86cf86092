use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chat_api::bus::{MemoryBus, PubSub, RedisBus};
use chat_api::config::Config;
use chat_api::entity::{Channel, Hub};
use chat_api::gateway::HubManager;
use chat_api::store::{MemoryMessageStore, MessageStore};
use chat_api::AppState;

#[tokio::main]
async fn main() {
    // Env vars may also be set externally.
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    let bus: Arc<dyn PubSub> = match config.redis_url.as_deref() {
        Some(url) => Arc::new(
            RedisBus::connect(url)
                .await
                .expect("failed to connect to redis"),
        ),
        None => {
            tracing::warn!("REDIS_URL not set; messages stay within this instance");
            Arc::new(MemoryBus::new())
        }
    };
    let store: Arc<dyn MessageStore> = Arc::new(MemoryMessageStore::new());

    let hub = Hub::new("", config.workspace_name.clone()).expect("invalid workspace name");
    let hub = HubManager::start(hub, bus, config.gateway);

    let general = Channel::new(config.default_channel.clone(), config.default_channel.clone(), false)
        .expect("invalid default channel");
    hub.register_channel(general)
        .await
        .expect("failed to start default channel");

    tracing::info!(
        hub_id = %hub.id(),
        workspace = %hub.name(),
        default_channel = %config.default_channel,
        "chat-api configured"
    );

    let state = AppState {
        hub: hub.clone(),
        store,
        config: Arc::new(config),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(chat_api::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "chat-api listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    hub.stop();
    tracing::info!("chat-api stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(%e, "failed to listen for shutdown signal");
    }
}
