//! Hub manager: the workspace-wide registry of connected clients and the
//! directory of running channel managers.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::bus::PubSub;
use crate::config::GatewayConfig;
use crate::entity::{Channel, Client, Hub};

use super::{ChannelHandle, ChannelManager, ClientHandle, GatewayError};

enum HubCommand {
    Register(Client, ClientHandle),
    Unregister(String),
    RegisterChannel(Channel, oneshot::Sender<Result<ChannelHandle, GatewayError>>),
    FindChannel(ChannelKey, oneshot::Sender<Option<ChannelHandle>>),
    Channels(oneshot::Sender<Vec<ChannelHandle>>),
    Clients(oneshot::Sender<Vec<String>>),
}

enum ChannelKey {
    Id(String),
    Name(String),
}

/// Handle to a running hub. Cloneable; every clone talks to the same loop.
#[derive(Clone)]
pub struct HubHandle {
    id: String,
    name: String,
    commands: mpsc::UnboundedSender<HubCommand>,
    cancel: CancellationToken,
}

impl HubHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a client to the workspace and enlist it in every public channel.
    pub fn register(&self, client: Client, handle: ClientHandle) -> Result<(), GatewayError> {
        self.send(HubCommand::Register(client, handle))
    }

    /// Remove a client from the workspace and from every channel.
    pub fn unregister(&self, client_id: &str) -> Result<(), GatewayError> {
        self.send(HubCommand::Unregister(client_id.to_string()))
    }

    /// Start a channel manager for `channel` and add it to the directory.
    pub async fn register_channel(&self, channel: Channel) -> Result<ChannelHandle, GatewayError> {
        let (tx, rx) = oneshot::channel();
        self.send(HubCommand::RegisterChannel(channel, tx))?;
        rx.await.map_err(|_| GatewayError::HubClosed)?
    }

    pub async fn find_channel_by_id(&self, id: &str) -> Result<Option<ChannelHandle>, GatewayError> {
        self.request(|tx| HubCommand::FindChannel(ChannelKey::Id(id.to_string()), tx))
            .await
    }

    pub async fn find_channel_by_name(
        &self,
        name: &str,
    ) -> Result<Option<ChannelHandle>, GatewayError> {
        self.request(|tx| HubCommand::FindChannel(ChannelKey::Name(name.to_string()), tx))
            .await
    }

    /// Every registered channel, in registration order.
    pub async fn channels(&self) -> Result<Vec<ChannelHandle>, GatewayError> {
        self.request(HubCommand::Channels).await
    }

    /// Ids of every registered client.
    pub async fn client_ids(&self) -> Result<Vec<String>, GatewayError> {
        self.request(HubCommand::Clients).await
    }

    /// Stop the hub and every channel manager it started.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn send(&self, command: HubCommand) -> Result<(), GatewayError> {
        self.commands.send(command).map_err(|_| GatewayError::HubClosed)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> HubCommand,
    ) -> Result<T, GatewayError> {
        let (tx, rx) = oneshot::channel();
        self.send(command(tx))?;
        rx.await.map_err(|_| GatewayError::HubClosed)
    }
}

struct Registered {
    client: Client,
    handle: ClientHandle,
}

pub struct HubManager {
    hub: Hub,
    clients: HashMap<String, Registered>,
    channels: Vec<ChannelHandle>,
    commands: mpsc::UnboundedReceiver<HubCommand>,
    bus: Arc<dyn PubSub>,
    config: GatewayConfig,
    cancel: CancellationToken,
}

impl HubManager {
    /// Spawn the hub's control loop.
    pub fn start(hub: Hub, bus: Arc<dyn PubSub>, config: GatewayConfig) -> HubHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let handle = HubHandle {
            id: hub.id().to_string(),
            name: hub.name().to_string(),
            commands: tx,
            cancel: cancel.clone(),
        };

        tracing::info!(hub_id = %hub.id(), name = %hub.name(), "hub started");

        let manager = HubManager {
            hub,
            clients: HashMap::new(),
            channels: Vec::new(),
            commands: rx,
            bus,
            config,
            cancel,
        };
        tokio::spawn(manager.run());

        handle
    }

    async fn run(mut self) {
        loop {
            let command = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };

            match command {
                HubCommand::Register(client, handle) => self.register(client, handle),
                HubCommand::Unregister(client_id) => self.unregister(&client_id),
                HubCommand::RegisterChannel(channel, reply) => {
                    let _ = reply.send(self.register_channel(channel).await);
                }
                HubCommand::FindChannel(key, reply) => {
                    let found = match key {
                        ChannelKey::Id(id) => self.channels.iter().find(|c| c.id() == id),
                        ChannelKey::Name(name) => self.channels.iter().find(|c| c.name() == name),
                    };
                    let _ = reply.send(found.cloned());
                }
                HubCommand::Channels(reply) => {
                    let _ = reply.send(self.channels.clone());
                }
                HubCommand::Clients(reply) => {
                    let _ = reply.send(self.clients.keys().cloned().collect());
                }
            }
        }

        for registered in self.clients.values() {
            registered.handle.disconnect();
        }
        // Channel managers run on child tokens; take them down with the hub.
        self.cancel.cancel();
        self.commands.close();
        tracing::info!(hub_id = %self.hub.id(), "hub stopped");
    }

    fn register(&mut self, mut client: Client, handle: ClientHandle) {
        if !self.hub.register_client(client.id()) {
            tracing::debug!(client_id = %client.id(), "client already registered");
            return;
        }

        for channel in self.channels.iter().filter(|c| !c.is_private()) {
            match channel.register(handle.clone()) {
                Ok(()) => {
                    client.join_channel(channel.id());
                }
                Err(e) => tracing::warn!(?e, client_id = %client.id(), "could not join channel"),
            }
        }

        tracing::info!(
            hub_id = %self.hub.id(),
            client_id = %client.id(),
            user_id = %client.user_id(),
            channels = client.channels().count(),
            clients = self.hub.client_count(),
            "client registered"
        );
        self.clients
            .insert(client.id().to_string(), Registered { client, handle });
    }

    fn unregister(&mut self, client_id: &str) {
        if !self.hub.unregister_client(client_id) {
            return;
        }
        let Some(Registered { mut client, handle }) = self.clients.remove(client_id) else {
            return;
        };

        // Unregister is a no-op for non-members, so every channel gets one.
        for channel in &self.channels {
            if let Err(e) = channel.unregister(client_id) {
                tracing::debug!(?e, %client_id, "channel already stopped");
            }
            client.leave_channel(channel.id());
        }

        tracing::info!(
            hub_id = %self.hub.id(),
            %client_id,
            user_id = %handle.user_id(),
            clients = self.hub.client_count(),
            "client unregistered"
        );
    }

    async fn register_channel(&mut self, channel: Channel) -> Result<ChannelHandle, GatewayError> {
        if self
            .channels
            .iter()
            .any(|c| c.id() == channel.id() || c.name() == channel.name())
        {
            return Err(GatewayError::ChannelExists(channel.name().to_string()));
        }

        let handle = ChannelManager::start(
            channel,
            self.bus.clone(),
            self.config.slow_consumer_timeout,
            self.cancel.child_token(),
        )
        .await?;

        self.channels.push(handle.clone());
        Ok(handle)
    }
}
