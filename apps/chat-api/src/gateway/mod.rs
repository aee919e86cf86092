//! Connection registry and channel fan-out engine.
//!
//! Every registry here has exactly one owner task. The hub loop owns the set of
//! connected clients and the channel directory; each channel loop owns its
//! membership. Other tasks talk to them only through command queues, and each
//! connection's socket is written only by its own write loop.

pub mod channel;
pub mod client;
pub mod hub;
pub mod server;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::bus::BusError;
use crate::entity::Client;

pub use channel::{ChannelHandle, ChannelManager};
pub use client::{register_connection, ClientPump, MessageRouter};
pub use hub::{HubHandle, HubManager};

/// One encoded outbound message, shared between every mailbox it lands in.
pub type Frame = Arc<str>;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("hub is stopped")]
    HubClosed,
    #[error("channel {0} is stopped")]
    ChannelClosed(String),
    #[error("channel {0} already exists")]
    ChannelExists(String),
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
    #[error("write deadline exceeded")]
    WriteTimeout,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Why a frame could not be placed in a mailbox.
#[derive(Debug, PartialEq, Eq)]
pub enum DeliveryError {
    /// The connection is tearing down.
    Closed,
    /// The mailbox stayed full for the whole timeout.
    Full,
}

/// Cheap, cloneable reference to a connected client: its identity, the
/// sending half of its mailbox, and its disconnect switch.
///
/// The hub and channel managers hold these; the connection pump owns the
/// receiving half of the mailbox and the socket.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    client_id: String,
    user_id: String,
    mailbox: mpsc::Sender<Frame>,
    shutdown: CancellationToken,
}

impl ClientHandle {
    /// Create a handle for `client` with a bounded mailbox of `capacity` frames.
    pub fn open(client: &Client, capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            client_id: client.id().to_string(),
            user_id: client.user_id().to_string(),
            mailbox: tx,
            shutdown: CancellationToken::new(),
        };
        (handle, rx)
    }

    pub fn id(&self) -> &str {
        &self.client_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Queue a frame, waiting up to `timeout` for room.
    pub async fn deliver(&self, frame: Frame, timeout: Duration) -> Result<(), DeliveryError> {
        self.mailbox
            .send_timeout(frame, timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => DeliveryError::Full,
                SendTimeoutError::Closed(_) => DeliveryError::Closed,
            })
    }

    /// Ask the connection to tear down. Safe to call any number of times.
    pub fn disconnect(&self) {
        self.shutdown.cancel();
    }

    pub fn is_disconnecting(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once [`ClientHandle::disconnect`] has been called.
    pub fn disconnected(&self) -> WaitForCancellationFuture<'_> {
        self.shutdown.cancelled()
    }

    /// True once the write side has closed the mailbox.
    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deliver_reports_full_and_closed_mailboxes() {
        let client = Client::new("cli_1", "usr_1").unwrap();
        let (handle, mut rx) = ClientHandle::open(&client, 1);

        handle.deliver(Frame::from("a"), Duration::from_millis(10)).await.unwrap();
        assert_eq!(
            handle.deliver(Frame::from("b"), Duration::from_millis(10)).await,
            Err(DeliveryError::Full)
        );
        assert_eq!(&*rx.recv().await.unwrap(), "a");

        rx.close();
        assert!(handle.is_closed());
        assert_eq!(
            handle.deliver(Frame::from("c"), Duration::from_millis(10)).await,
            Err(DeliveryError::Closed)
        );
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let client = Client::new("cli_1", "usr_1").unwrap();
        let (handle, _rx) = ClientHandle::open(&client, 4);
        let other = handle.clone();

        assert!(!handle.is_disconnecting());
        handle.disconnect();
        other.disconnect();
        assert!(handle.is_disconnecting());
        other.disconnected().await;
    }
}
