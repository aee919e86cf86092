mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use chat_api::gateway::ChannelHandle;
use chat_api::AppState;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start an actual TCP server for WebSocket testing. The server runs in the
/// background.
async fn start_ws_server() -> (SocketAddr, AppState, Arc<common::RecordingStore>) {
    let (app, state, store) = common::test_app().await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state, store)
}

async fn general(state: &AppState) -> ChannelHandle {
    state
        .hub
        .find_channel_by_name(common::GENERAL)
        .await
        .unwrap()
        .expect("general channel")
}

/// Connect as `user_id`, identified by header.
async fn connect(addr: SocketAddr, user_id: &str) -> Ws {
    let mut request = format!("ws://{addr}/gateway").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("x-user-id", user_id.parse().unwrap());
    let (ws, _) = tokio_tungstenite::connect_async(request)
        .await
        .expect("ws connect");
    ws
}

async fn send(ws: &mut Ws, payload: serde_json::Value) {
    ws.send(tungstenite::Message::Text(payload.to_string().into()))
        .await
        .expect("send");
}

fn create(text: &str, target_id: &str) -> serde_json::Value {
    serde_json::json!({
        "text": text,
        "action": "CREATE_MESSAGE",
        "target_id": target_id,
    })
}

/// Next application message, skipping control frames. Coalesced frames are
/// split on newlines.
async fn next_messages(ws: &mut Ws) -> Vec<serde_json::Value> {
    loop {
        let msg = time::timeout(common::WAIT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream ended")
            .expect("ws read error");

        match msg {
            tungstenite::Message::Text(text) => {
                return text
                    .as_str()
                    .split('\n')
                    .map(|line| serde_json::from_str(line).expect("parse message"))
                    .collect();
            }
            tungstenite::Message::Ping(_) | tungstenite::Message::Pong(_) => continue,
            other => panic!("expected text frame, got: {other:?}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn broadcast_reaches_every_member_including_sender() {
    let (addr, state, store) = start_ws_server().await;
    let channel = general(&state).await;

    let mut alice = connect(addr, "usr_alice").await;
    let mut bob = connect(addr, "usr_bob").await;
    common::wait_for_members(&channel, 2).await;

    send(&mut alice, create("hi", common::GENERAL)).await;

    for ws in [&mut alice, &mut bob] {
        let received = next_messages(ws).await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["text"], "hi");
        assert_eq!(received[0]["user_id"], "usr_alice");
        assert_eq!(received[0]["action"], "CREATE_MESSAGE");
        assert_eq!(received[0]["target_id"], common::GENERAL);
        assert!(chat_common::has_prefix(
            received[0]["id"].as_str().unwrap(),
            chat_common::id::prefix::MESSAGE
        ));
    }
    assert_eq!(store.writes(), 1);
}

#[tokio::test]
async fn author_is_the_connected_user() {
    let (addr, state, _store) = start_ws_server().await;
    let channel = general(&state).await;

    let mut alice = connect(addr, "usr_alice").await;
    common::wait_for_members(&channel, 1).await;

    let mut spoofed = create("not me", common::GENERAL);
    spoofed["user_id"] = "usr_mallory".into();
    send(&mut alice, spoofed).await;

    let received = next_messages(&mut alice).await;
    assert_eq!(received[0]["user_id"], "usr_alice");
}

#[tokio::test]
async fn identity_can_come_from_query_string() {
    let (addr, state, _store) = start_ws_server().await;
    let channel = general(&state).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/gateway?user_id=usr_q"))
        .await
        .expect("ws connect");
    common::wait_for_members(&channel, 1).await;

    send(&mut ws, create("from a browser", common::GENERAL)).await;
    let received = next_messages(&mut ws).await;
    assert_eq!(received[0]["user_id"], "usr_q");
}

#[tokio::test]
async fn upgrade_without_identity_is_rejected() {
    let (addr, state, _store) = start_ws_server().await;

    let err = tokio_tungstenite::connect_async(format!("ws://{addr}/gateway"))
        .await
        .expect_err("upgrade should be refused");
    match err {
        tungstenite::Error::Http(response) => assert_eq!(response.status(), 401),
        other => panic!("expected HTTP rejection, got: {other:?}"),
    }
    assert!(state.hub.client_ids().await.unwrap().is_empty());
}

#[tokio::test]
async fn closing_the_socket_unregisters_everywhere() {
    let (addr, state, _store) = start_ws_server().await;
    let channel = general(&state).await;

    let mut alice = connect(addr, "usr_alice").await;
    let bob = connect(addr, "usr_bob").await;
    common::wait_for_members(&channel, 2).await;
    assert_eq!(state.hub.client_ids().await.unwrap().len(), 2);

    drop(bob);
    common::wait_for_members(&channel, 1).await;
    time::timeout(common::WAIT, async {
        while state.hub.client_ids().await.unwrap().len() != 1 {
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("hub still lists the closed client");

    // The survivor keeps receiving.
    send(&mut alice, create("still here", common::GENERAL)).await;
    let received = next_messages(&mut alice).await;
    assert_eq!(received[0]["text"], "still here");
}

#[tokio::test]
async fn unknown_target_is_dropped_and_connection_survives() {
    let (addr, state, store) = start_ws_server().await;
    let channel = general(&state).await;

    let mut alice = connect(addr, "usr_alice").await;
    common::wait_for_members(&channel, 1).await;

    send(&mut alice, create("into the void", "ch_missing")).await;
    send(&mut alice, serde_json::json!({ "text": "no action", "target_id": "general" })).await;
    alice
        .send(tungstenite::Message::Text("{not json".into()))
        .await
        .unwrap();
    send(&mut alice, create("hello", common::GENERAL)).await;

    let received = next_messages(&mut alice).await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["text"], "hello");
    // Persisted even though nobody could receive it.
    assert_eq!(store.writes(), 2);
}

#[tokio::test]
async fn oversized_frame_closes_the_connection() {
    let (addr, state, _store) = start_ws_server().await;
    let channel = general(&state).await;

    let mut alice = connect(addr, "usr_alice").await;
    common::wait_for_members(&channel, 1).await;

    let huge = "x".repeat(state.config.gateway.max_message_size + 1);
    let _ = alice
        .send(tungstenite::Message::Text(create(&huge, common::GENERAL).to_string().into()))
        .await;

    common::wait_for_members(&channel, 0).await;
}
