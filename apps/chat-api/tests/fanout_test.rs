//! End-to-end fan-out through hubs, channel managers and a shared bus,
//! observed from client mailboxes without sockets.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time;

use chat_api::bus::MemoryBus;
use chat_api::entity::{Client, Message};
use chat_api::gateway::{ClientPump, Frame, HubHandle, MessageRouter};
use chat_api::store::MessageStore;

struct Connected {
    pump: ClientPump,
    router: MessageRouter,
    mailbox: mpsc::Receiver<Frame>,
}

fn connect(hub: &HubHandle, store: Arc<common::RecordingStore>, user_id: &str) -> Connected {
    let config = common::test_config().gateway;
    let client = Client::new("", user_id).unwrap();
    let (pump, mailbox) = ClientPump::register(client, hub.clone(), store.clone(), config).unwrap();
    let router = MessageRouter::new(pump.handle(), hub.clone(), store);
    Connected {
        pump,
        router,
        mailbox,
    }
}

fn payload(action: &str, id: &str, text: &str) -> Vec<u8> {
    serde_json::json!({
        "id": id,
        "text": text,
        "action": action,
        "target_id": common::GENERAL,
    })
    .to_string()
    .into_bytes()
}

async fn recv(mailbox: &mut mpsc::Receiver<Frame>) -> Message {
    let frame = time::timeout(common::WAIT, mailbox.recv())
        .await
        .expect("timeout waiting for frame")
        .expect("mailbox closed");
    Message::decode(frame.as_bytes()).expect("decode frame")
}

async fn assert_silent(mailbox: &mut mpsc::Receiver<Frame>) {
    assert!(
        time::timeout(Duration::from_millis(150), mailbox.recv())
            .await
            .is_err(),
        "unexpected frame"
    );
}

#[tokio::test]
async fn messages_cross_instances_through_the_bus() {
    let bus = Arc::new(MemoryBus::new());
    let config = common::test_config();
    let (east, east_general) = common::start_hub(bus.clone(), &config).await;
    let (west, west_general) = common::start_hub(bus.clone(), &config).await;
    let store = Arc::new(common::RecordingStore::default());

    let mut alice = connect(&east, store.clone(), "usr_alice");
    let mut bob = connect(&west, store.clone(), "usr_bob");
    common::wait_for_members(&east_general, 1).await;
    common::wait_for_members(&west_general, 1).await;

    alice.router.handle_frame(&payload("CREATE_MESSAGE", "", "hi")).await;

    let seen_by_alice = recv(&mut alice.mailbox).await;
    let seen_by_bob = recv(&mut bob.mailbox).await;
    assert_eq!(seen_by_alice, seen_by_bob);
    assert_eq!(seen_by_bob.text(), "hi");
    assert_eq!(seen_by_bob.user_id(), "usr_alice");
    // Persisted once, by the instance that accepted it.
    assert_eq!(store.writes(), 1);
}

#[tokio::test]
async fn one_senders_messages_arrive_in_order() {
    let bus = Arc::new(MemoryBus::new());
    let config = common::test_config();
    let (hub, general) = common::start_hub(bus, &config).await;
    let store = Arc::new(common::RecordingStore::default());

    let alice = connect(&hub, store.clone(), "usr_alice");
    let mut bob = connect(&hub, store.clone(), "usr_bob");
    common::wait_for_members(&general, 2).await;

    for i in 0..50 {
        alice
            .router
            .handle_frame(&payload("CREATE_MESSAGE", "", &format!("m{i}")))
            .await;
    }

    for i in 0..50 {
        assert_eq!(recv(&mut bob.mailbox).await.text(), format!("m{i}"));
    }
}

#[tokio::test]
async fn update_and_delete_follow_create() {
    let bus = Arc::new(MemoryBus::new());
    let config = common::test_config();
    let (hub, general) = common::start_hub(bus, &config).await;
    let store = Arc::new(common::RecordingStore::default());

    let mut alice = connect(&hub, store.clone(), "usr_alice");
    common::wait_for_members(&general, 1).await;

    alice.router.handle_frame(&payload("CREATE_MESSAGE", "", "draft")).await;
    let created = recv(&mut alice.mailbox).await;

    alice
        .router
        .handle_frame(&payload("UPDATE_MESSAGE", created.id(), "final"))
        .await;
    let updated = recv(&mut alice.mailbox).await;
    assert_eq!(updated.id(), created.id());
    assert_eq!(updated.text(), "final");
    assert_eq!(
        store.inner.get(created.id()).await.unwrap().unwrap().text(),
        "final"
    );

    alice
        .router
        .handle_frame(&payload("DELETE_MESSAGE", created.id(), ""))
        .await;
    let deleted = recv(&mut alice.mailbox).await;
    assert_eq!(deleted.action().as_str(), "DELETE_MESSAGE");
    assert_eq!(deleted.id(), created.id());
    assert_eq!(deleted.text(), "");
    assert!(store.inner.get(created.id()).await.unwrap().is_none());
}

#[tokio::test]
async fn failed_persistence_is_not_broadcast() {
    let bus = Arc::new(MemoryBus::new());
    let config = common::test_config();
    let (hub, general) = common::start_hub(bus, &config).await;
    let store = Arc::new(common::RecordingStore::default());

    let mut alice = connect(&hub, store.clone(), "usr_alice");
    let mut bob = connect(&hub, store.clone(), "usr_bob");
    common::wait_for_members(&general, 2).await;

    // Updating a message that was never created fails in the store.
    alice
        .router
        .handle_frame(&payload("UPDATE_MESSAGE", "msg_ghost", "boo"))
        .await;
    store.set_failing(true);
    alice.router.handle_frame(&payload("CREATE_MESSAGE", "", "lost")).await;

    assert_eq!(store.writes(), 2);
    assert_silent(&mut alice.mailbox).await;
    assert_silent(&mut bob.mailbox).await;

    store.set_failing(false);
    alice.router.handle_frame(&payload("CREATE_MESSAGE", "", "back")).await;
    assert_eq!(recv(&mut bob.mailbox).await.text(), "back");
}

#[tokio::test]
async fn departed_clients_stop_receiving() {
    let bus = Arc::new(MemoryBus::new());
    let config = common::test_config();
    let (hub, general) = common::start_hub(bus, &config).await;
    let store = Arc::new(common::RecordingStore::default());

    let mut alice = connect(&hub, store.clone(), "usr_alice");
    let mut bob = connect(&hub, store.clone(), "usr_bob");
    common::wait_for_members(&general, 2).await;

    assert!(bob.pump.disconnect());
    common::wait_for_members(&general, 1).await;

    alice.router.handle_frame(&payload("CREATE_MESSAGE", "", "bye bob")).await;
    assert_eq!(recv(&mut alice.mailbox).await.text(), "bye bob");
    assert!(bob.pump.handle().is_disconnecting());
    assert_silent(&mut bob.mailbox).await;
}
