#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;

use chat_api::bus::MemoryBus;
use chat_api::config::{Config, GatewayConfig};
use chat_api::entity::{Channel, Hub, Message};
use chat_api::gateway::{ChannelHandle, HubHandle, HubManager};
use chat_api::store::{MemoryMessageStore, MessageStore, StoreError};
use chat_api::AppState;

pub const GENERAL: &str = "general";
pub const WAIT: Duration = Duration::from_secs(5);

/// Message store that records writes and can be switched into failure mode.
#[derive(Default)]
pub struct RecordingStore {
    pub inner: MemoryMessageStore,
    writes: AtomicUsize,
    failing: AtomicBool,
}

impl RecordingStore {
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn record(&self) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for RecordingStore {
    async fn create(&self, message: &Message) -> Result<(), StoreError> {
        self.record()?;
        self.inner.create(message).await
    }

    async fn update(&self, message: &Message) -> Result<(), StoreError> {
        self.record()?;
        self.inner.update(message).await
    }

    async fn delete(&self, message_id: &str) -> Result<(), StoreError> {
        self.record()?;
        self.inner.delete(message_id).await
    }

    async fn get(&self, message_id: &str) -> Result<Option<Message>, StoreError> {
        self.inner.get(message_id).await
    }

    async fn list(&self, channel_id: &str) -> Result<Vec<Message>, StoreError> {
        self.inner.list(channel_id).await
    }
}

pub fn test_config() -> Config {
    Config {
        port: 0,
        workspace_name: "test-workspace".to_string(),
        default_channel: GENERAL.to_string(),
        redis_url: None,
        gateway: GatewayConfig::default(),
    }
}

/// Start a hub on `bus` with the default channel registered.
pub async fn start_hub(bus: Arc<MemoryBus>, config: &Config) -> (HubHandle, ChannelHandle) {
    let hub = HubManager::start(
        Hub::new("", config.workspace_name.clone()).expect("hub"),
        bus,
        config.gateway,
    );
    let general = hub
        .register_channel(Channel::new(GENERAL, GENERAL, false).expect("channel"))
        .await
        .expect("register default channel");
    (hub, general)
}

/// Build a test AppState backed by the in-process bus and a recording store.
pub async fn test_state() -> (AppState, Arc<RecordingStore>) {
    let config = test_config();
    let (hub, _general) = start_hub(Arc::new(MemoryBus::new()), &config).await;
    let store = Arc::new(RecordingStore::default());

    let state = AppState {
        hub,
        store: store.clone(),
        config: Arc::new(config),
    };
    (state, store)
}

pub async fn test_app() -> (Router, AppState, Arc<RecordingStore>) {
    let (state, store) = test_state().await;
    let app = chat_api::routes::router().with_state(state.clone());
    (app, state, store)
}

/// Poll until `channel` has exactly `expected` members.
pub async fn wait_for_members(channel: &ChannelHandle, expected: usize) -> Vec<String> {
    tokio::time::timeout(WAIT, async {
        loop {
            let members = channel.member_ids().await.expect("channel running");
            if members.len() == expected {
                return members;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("membership never settled")
}
