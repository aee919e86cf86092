//! Per-connection pump.
//!
//! Each WebSocket is split into a read loop, which decodes client messages
//! and routes them, and a write loop, which is the only code that ever writes
//! to the socket. Outbound traffic reaches the write loop through the
//! client's bounded mailbox.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};

use crate::config::{GatewayConfig, MIN_WAIT};
use crate::entity::{Action, Client, Message, MessagePayload};
use crate::store::MessageStore;

use super::{ClientHandle, Frame, GatewayError, HubHandle};

/// Separator between frames coalesced into one WebSocket message.
const FRAME_SEPARATOR: char = '\n';

/// Turns decoded client messages into persistence calls and channel
/// broadcasts.
pub struct MessageRouter {
    client_id: String,
    user_id: String,
    hub: HubHandle,
    store: Arc<dyn MessageStore>,
}

impl MessageRouter {
    pub fn new(handle: &ClientHandle, hub: HubHandle, store: Arc<dyn MessageStore>) -> Self {
        Self {
            client_id: handle.id().to_string(),
            user_id: handle.user_id().to_string(),
            hub,
            store,
        }
    }

    /// Decode one inbound frame and route it. The author is always the
    /// authenticated user of this connection.
    pub async fn handle_frame(&self, bytes: &[u8]) {
        let payload = match MessagePayload::parse(bytes) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(?e, client_id = %self.client_id, "malformed message");
                return;
            }
        };

        match payload.authored_by(&self.user_id) {
            Ok(message) => self.route(message).await,
            Err(e) => {
                tracing::warn!(%e, client_id = %self.client_id, "rejected message");
            }
        }
    }

    /// Persist `message` according to its action, then broadcast it to its
    /// target channel. Nothing is broadcast if persistence fails.
    pub async fn route(&self, message: Message) {
        let (message, persisted) = match message.action() {
            Action::CreateMessage => {
                let message = message.with_fresh_id();
                let persisted = self.store.create(&message).await;
                (message, persisted)
            }
            Action::UpdateMessage => {
                let persisted = self.store.update(&message).await;
                (message, persisted)
            }
            Action::DeleteMessage => {
                let persisted = self.store.delete(message.id()).await;
                (message, persisted)
            }
            Action::GetMessages
            | Action::ListMessages
            | Action::CreatePublicChannel
            | Action::JoinPublicChannel
            | Action::LeavePublicChannel
            | Action::None => {
                tracing::warn!(
                    action = %message.action(),
                    client_id = %self.client_id,
                    "unhandled message action"
                );
                return;
            }
        };

        if let Err(e) = persisted {
            tracing::error!(
                %e,
                message_id = %message.id(),
                client_id = %self.client_id,
                "failed to persist message"
            );
            return;
        }
        self.broadcast(message).await;
    }

    async fn broadcast(&self, message: Message) {
        let channel_id = message.target_id().to_string();
        let channel = match self.hub.find_channel_by_id(&channel_id).await {
            Ok(Some(channel)) => channel,
            Ok(None) => {
                tracing::warn!(%channel_id, message_id = %message.id(), "channel not found");
                return;
            }
            Err(e) => {
                tracing::warn!(%e, %channel_id, "hub unavailable");
                return;
            }
        };

        tracing::debug!(%channel_id, message_id = %message.id(), "broadcasting message");
        if let Err(e) = channel.broadcast(message) {
            tracing::warn!(%e, %channel_id, "channel unavailable");
        }
    }
}

/// The read side of one connection, plus its teardown.
pub struct ClientPump {
    handle: ClientHandle,
    hub: HubHandle,
    router: MessageRouter,
    config: GatewayConfig,
    torn_down: AtomicBool,
}

impl ClientPump {
    /// Open a mailbox for `client` and register it with the hub. Returns the
    /// pump and the mailbox receiver destined for the write loop.
    pub fn register(
        client: Client,
        hub: HubHandle,
        store: Arc<dyn MessageStore>,
        config: GatewayConfig,
    ) -> Result<(Self, mpsc::Receiver<Frame>), GatewayError> {
        let (handle, mailbox) = ClientHandle::open(&client, config.mailbox_capacity);
        hub.register(client, handle.clone())?;

        let pump = Self {
            router: MessageRouter::new(&handle, hub.clone(), store),
            handle,
            hub,
            config,
            torn_down: AtomicBool::new(false),
        };
        Ok((pump, mailbox))
    }

    pub fn handle(&self) -> &ClientHandle {
        &self.handle
    }

    /// Run both loops over `socket` until the connection ends.
    pub async fn serve(self, socket: WebSocket, mailbox: mpsc::Receiver<Frame>) {
        let (sink, stream) = socket.split();
        let writer = tokio::spawn(write_loop(sink, mailbox, self.handle.clone(), self.config));
        self.read_loop(stream).await;
        let _ = writer.await;
    }

    /// Read frames until the peer goes away, misbehaves, misses the read
    /// deadline, or a disconnect is requested; then tear down.
    pub async fn read_loop<S, E>(&self, mut stream: S)
    where
        S: Stream<Item = Result<WsMessage, E>> + Unpin,
        E: Display,
    {
        let client_id = self.handle.id();
        let mut deadline = Instant::now() + self.config.pong_wait;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.handle.disconnected() => break,
                next = time::timeout_at(deadline, stream.next()) => next,
            };

            let frame = match next {
                Err(_) => {
                    tracing::info!(%client_id, "read deadline exceeded");
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    tracing::warn!(error = %e, %client_id, "ws read error");
                    break;
                }
                Ok(Some(Ok(frame))) => frame,
            };

            match frame {
                WsMessage::Text(text) => {
                    if !self.within_limit(text.len()) {
                        break;
                    }
                    self.router.handle_frame(text.as_bytes()).await;
                }
                WsMessage::Binary(data) => {
                    if !self.within_limit(data.len()) {
                        break;
                    }
                    self.router.handle_frame(&data).await;
                }
                WsMessage::Pong(_) => deadline = Instant::now() + self.config.pong_wait,
                WsMessage::Ping(_) => {}
                WsMessage::Close(_) => break,
            }
        }

        self.disconnect();
    }

    fn within_limit(&self, len: usize) -> bool {
        if len > self.config.max_message_size {
            tracing::warn!(
                client_id = %self.handle.id(),
                len,
                limit = self.config.max_message_size,
                "frame exceeds size limit"
            );
            return false;
        }
        true
    }

    /// Unregister from the hub (and so from every channel), then close the
    /// mailbox and the connection. Only the first call does anything.
    pub fn disconnect(&self) -> bool {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Err(e) = self.hub.unregister(self.handle.id()) {
            tracing::debug!(%e, client_id = %self.handle.id(), "hub already stopped");
        }
        self.handle.disconnect();
        tracing::info!(
            client_id = %self.handle.id(),
            user_id = %self.handle.user_id(),
            "client disconnected"
        );
        true
    }
}

/// Register `client` with the hub and start pumping `socket` in the
/// background.
pub fn register_connection(
    socket: WebSocket,
    client: Client,
    hub: HubHandle,
    store: Arc<dyn MessageStore>,
    config: GatewayConfig,
) -> Result<ClientHandle, GatewayError> {
    let (pump, mailbox) = ClientPump::register(client, hub, store, config)?;
    let handle = pump.handle().clone();
    tokio::spawn(pump.serve(socket, mailbox));
    Ok(handle)
}

/// Drain the mailbox onto the socket and keep the peer alive with pings.
///
/// Exits when the connection is told to disconnect, the mailbox closes, or a
/// write misses its deadline. On the way out it closes the mailbox, sends a
/// best-effort close frame, and makes sure the read side stops too.
pub async fn write_loop<W>(
    mut sink: W,
    mut mailbox: mpsc::Receiver<Frame>,
    handle: ClientHandle,
    config: GatewayConfig,
) where
    W: Sink<WsMessage> + Unpin,
    W::Error: Display,
{
    let mut keepalive = time::interval(config.ping_period.max(MIN_WAIT));
    keepalive.tick().await; // First tick fires immediately; skip it.

    loop {
        let outbound = tokio::select! {
            biased;
            _ = handle.disconnected() => None,
            frame = mailbox.recv() => frame
                .map(|frame| WsMessage::Text(coalesce(frame, &mut mailbox, config.mailbox_capacity).into())),
            _ = keepalive.tick() => Some(WsMessage::Ping(Bytes::new())),
        };

        let Some(outbound) = outbound else {
            mailbox.close();
            let _ = send_frame(&mut sink, WsMessage::Close(None), config.write_wait).await;
            break;
        };

        if let Err(e) = send_frame(&mut sink, outbound, config.write_wait).await {
            tracing::warn!(%e, client_id = %handle.id(), "ws write failed");
            mailbox.close();
            break;
        }
    }

    handle.disconnect();
    let _ = time::timeout(config.write_wait, sink.close()).await;
}

/// Join `first` with whatever is already queued behind it, up to `limit`
/// frames in total.
fn coalesce(first: Frame, mailbox: &mut mpsc::Receiver<Frame>, limit: usize) -> String {
    let mut batch = String::from(&*first);
    for _ in 1..limit {
        match mailbox.try_recv() {
            Ok(next) => {
                batch.push(FRAME_SEPARATOR);
                batch.push_str(&next);
            }
            Err(_) => break,
        }
    }
    batch
}

async fn send_frame<W>(sink: &mut W, frame: WsMessage, wait: Duration) -> Result<(), GatewayError>
where
    W: Sink<WsMessage> + Unpin,
    W::Error: Display,
{
    match time::timeout(wait, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(GatewayError::Transport(e.to_string())),
        Err(_) => Err(GatewayError::WriteTimeout),
    }
}
