//! Channel manager: the single owner of one channel's membership and the
//! bridge between that channel and the bus.
//!
//! Two tasks run per channel:
//! - the control loop applies register / unregister commands in arrival order
//!   and publishes broadcasts to the bus topic named after the channel id;
//! - the delivery loop drains the channel's bus subscription and copies each
//!   payload into every member's mailbox.
//!
//! Local delivery happens only through the subscription, so messages authored
//! here and on other instances take the same path. The delivery loop reads
//! membership from an immutable snapshot the control loop republishes after
//! every change.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::bus::{PubSub, Subscription};
use crate::entity::{Channel, Message};

use super::{ClientHandle, DeliveryError, Frame, GatewayError};

type Members = Arc<Vec<ClientHandle>>;

/// First wait before resubscribing after the bus stream ends; doubles per
/// consecutive failure.
const RESUBSCRIBE_BACKOFF: Duration = Duration::from_millis(50);
const MAX_RESUBSCRIBE_BACKOFF: Duration = Duration::from_secs(5);
/// Consecutive resubscriptions that deliver nothing before the channel closes.
const MAX_RESUBSCRIBE_ATTEMPTS: u32 = 5;

enum ChannelCommand {
    Register(ClientHandle),
    Unregister(String),
    Broadcast(Message),
    Members(oneshot::Sender<Vec<String>>),
    FindMembers(MemberKey, oneshot::Sender<Vec<ClientHandle>>),
}

#[derive(Debug)]
enum MemberKey {
    Client(String),
    User(String),
}

/// Handle to a running channel manager.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    id: String,
    name: String,
    private: bool,
    commands: mpsc::UnboundedSender<ChannelCommand>,
}

impl std::fmt::Debug for ChannelCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Register(c) => f.debug_tuple("Register").field(&c.id()).finish(),
            Self::Unregister(id) => f.debug_tuple("Unregister").field(id).finish(),
            Self::Broadcast(m) => f.debug_tuple("Broadcast").field(&m.id()).finish(),
            Self::Members(_) => f.write_str("Members"),
            Self::FindMembers(key, _) => f.debug_tuple("FindMembers").field(key).finish(),
        }
    }
}

impl ChannelHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_private(&self) -> bool {
        self.private
    }

    /// Add a member. Registering an existing member is a no-op.
    pub fn register(&self, client: ClientHandle) -> Result<(), GatewayError> {
        self.send(ChannelCommand::Register(client))
    }

    /// Remove a member. Unregistering a non-member is a no-op.
    pub fn unregister(&self, client_id: &str) -> Result<(), GatewayError> {
        self.send(ChannelCommand::Unregister(client_id.to_string()))
    }

    /// Publish `message` to this channel's bus topic.
    pub fn broadcast(&self, message: Message) -> Result<(), GatewayError> {
        self.send(ChannelCommand::Broadcast(message))
    }

    /// Current member client ids, as seen after every command sent before
    /// this call.
    pub async fn member_ids(&self) -> Result<Vec<String>, GatewayError> {
        let (tx, rx) = oneshot::channel();
        self.send(ChannelCommand::Members(tx))?;
        rx.await.map_err(|_| self.closed())
    }

    /// The member connected under `client_id`, if any.
    pub async fn find_member(&self, client_id: &str) -> Result<Option<ClientHandle>, GatewayError> {
        let found = self.find(MemberKey::Client(client_id.to_string())).await?;
        Ok(found.into_iter().next())
    }

    /// Every connection `user_id` has in this channel.
    pub async fn find_members_by_user(&self, user_id: &str) -> Result<Vec<ClientHandle>, GatewayError> {
        self.find(MemberKey::User(user_id.to_string())).await
    }

    async fn find(&self, key: MemberKey) -> Result<Vec<ClientHandle>, GatewayError> {
        let (tx, rx) = oneshot::channel();
        self.send(ChannelCommand::FindMembers(key, tx))?;
        rx.await.map_err(|_| self.closed())
    }

    fn send(&self, command: ChannelCommand) -> Result<(), GatewayError> {
        self.commands.send(command).map_err(|_| self.closed())
    }

    fn closed(&self) -> GatewayError {
        GatewayError::ChannelClosed(self.id.clone())
    }
}

pub struct ChannelManager {
    channel: Channel,
    members: HashMap<String, ClientHandle>,
    snapshot: watch::Sender<Members>,
    commands: mpsc::UnboundedReceiver<ChannelCommand>,
    bus: Arc<dyn PubSub>,
    cancel: CancellationToken,
}

impl ChannelManager {
    /// Subscribe to the channel's topic and spawn its control and delivery
    /// loops. Both stop when `cancel` fires.
    ///
    /// The subscription is in place before this returns, so the first
    /// broadcast is already observable locally.
    pub async fn start(
        channel: Channel,
        bus: Arc<dyn PubSub>,
        slow_consumer_timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<ChannelHandle, GatewayError> {
        let subscription = bus.subscribe(channel.id()).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (snapshot, snapshot_rx) = watch::channel(Members::default());

        let handle = ChannelHandle {
            id: channel.id().to_string(),
            name: channel.name().to_string(),
            private: channel.is_private(),
            commands: tx.clone(),
        };

        let delivery = DeliveryLoop {
            channel_id: handle.id.clone(),
            bus: bus.clone(),
            members: snapshot_rx,
            commands: tx,
            slow_consumer_timeout,
            cancel: cancel.clone(),
        };

        let manager = ChannelManager {
            channel,
            members: HashMap::new(),
            snapshot,
            commands: rx,
            bus,
            cancel,
        };

        tracing::info!(channel_id = %handle.id, name = %handle.name, "channel manager started");

        tokio::spawn(delivery.run(subscription));
        tokio::spawn(manager.run());

        Ok(handle)
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
                ChannelCommand::Register(client) => self.register(client),
                ChannelCommand::Unregister(client_id) => self.unregister(&client_id),
                ChannelCommand::Broadcast(message) => self.publish(&message).await,
                ChannelCommand::Members(reply) => {
                    let _ = reply.send(self.channel.members().map(str::to_string).collect());
                }
                ChannelCommand::FindMembers(key, reply) => {
                    let found = match key {
                        MemberKey::Client(id) => self.members.get(&id).cloned().into_iter().collect(),
                        MemberKey::User(user_id) => self
                            .members
                            .values()
                            .filter(|m| m.user_id() == user_id)
                            .cloned()
                            .collect(),
                    };
                    let _ = reply.send(found);
                }
            }
        }

        self.commands.close();
        tracing::info!(channel_id = %self.channel.id(), "channel manager stopped");
    }

    fn register(&mut self, client: ClientHandle) {
        if !self.channel.register(client.id()) {
            return;
        }
        tracing::debug!(
            channel_id = %self.channel.id(),
            client_id = %client.id(),
            members = self.channel.member_count(),
            "client joined channel"
        );
        self.members.insert(client.id().to_string(), client);
        self.publish_snapshot();
    }

    fn unregister(&mut self, client_id: &str) {
        if !self.channel.unregister(client_id) {
            return;
        }
        self.members.remove(client_id);
        tracing::debug!(
            channel_id = %self.channel.id(),
            %client_id,
            members = self.channel.member_count(),
            "client left channel"
        );
        self.publish_snapshot();
    }

    fn publish_snapshot(&self) {
        let members: Vec<ClientHandle> = self.members.values().cloned().collect();
        self.snapshot.send_replace(Arc::new(members));
    }

    async fn publish(&self, message: &Message) {
        let payload = match message.encode() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(?e, message_id = %message.id(), "failed to encode message");
                return;
            }
        };

        match self.bus.publish(self.channel.id(), &payload).await {
            Ok(()) => tracing::debug!(
                channel_id = %self.channel.id(),
                message_id = %message.id(),
                "published message"
            ),
            Err(e) => tracing::error!(
                ?e,
                channel_id = %self.channel.id(),
                message_id = %message.id(),
                "failed to publish message"
            ),
        }
    }
}

struct DeliveryLoop {
    channel_id: String,
    bus: Arc<dyn PubSub>,
    members: watch::Receiver<Members>,
    commands: mpsc::UnboundedSender<ChannelCommand>,
    slow_consumer_timeout: Duration,
    cancel: CancellationToken,
}

impl DeliveryLoop {
    async fn run(self, mut subscription: Subscription) {
        let mut failures = 0;
        loop {
            let payload = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                payload = subscription.next() => payload,
            };

            let Some(payload) = payload else {
                tracing::warn!(channel_id = %self.channel_id, "bus subscription ended");
                match self.resubscribe(&mut failures).await {
                    Some(next) => {
                        subscription = next;
                        continue;
                    }
                    None => break,
                }
            };
            failures = 0;

            let frame: Frame = match String::from_utf8(payload) {
                Ok(text) => Frame::from(text),
                Err(e) => {
                    tracing::warn!(?e, channel_id = %self.channel_id, "dropping non-UTF-8 payload");
                    continue;
                }
            };

            let members = self.members.borrow().clone();
            fan_out(
                &self.channel_id,
                &members,
                frame,
                &self.commands,
                self.slow_consumer_timeout,
            )
            .await;
        }

        subscription.close();
    }

    /// Subscribe again with exponential backoff. After too many attempts that
    /// deliver nothing the channel is cancelled, so callers see it closed.
    async fn resubscribe(&self, failures: &mut u32) -> Option<Subscription> {
        loop {
            if *failures >= MAX_RESUBSCRIBE_ATTEMPTS {
                tracing::error!(
                    channel_id = %self.channel_id,
                    attempts = *failures,
                    "bus subscription lost, closing channel"
                );
                self.cancel.cancel();
                return None;
            }

            let delay = RESUBSCRIBE_BACKOFF
                .saturating_mul(1 << *failures)
                .min(MAX_RESUBSCRIBE_BACKOFF);
            *failures += 1;

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }

            match self.bus.subscribe(&self.channel_id).await {
                Ok(subscription) => {
                    tracing::info!(channel_id = %self.channel_id, "bus subscription restored");
                    return Some(subscription);
                }
                Err(e) => {
                    tracing::warn!(%e, channel_id = %self.channel_id, "resubscribe failed");
                }
            }
        }
    }
}

/// Copy `frame` into every member's mailbox. Members already tearing down
/// are skipped; a member whose mailbox stays full is evicted.
async fn fan_out(
    channel_id: &str,
    members: &[ClientHandle],
    frame: Frame,
    commands: &mpsc::UnboundedSender<ChannelCommand>,
    slow_consumer_timeout: Duration,
) {
    for member in members.iter().filter(|m| !m.is_disconnecting()) {
        match member.deliver(frame.clone(), slow_consumer_timeout).await {
            Ok(()) => {}
            Err(DeliveryError::Closed) => {
                tracing::debug!(%channel_id, client_id = %member.id(), "skipping closed mailbox");
            }
            Err(DeliveryError::Full) => {
                tracing::warn!(%channel_id, client_id = %member.id(), "slow consumer, disconnecting");
                let _ = commands.send(ChannelCommand::Unregister(member.id().to_string()));
                member.disconnect();
            }
        }
    }
}
