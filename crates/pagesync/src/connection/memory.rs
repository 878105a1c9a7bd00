//! In-memory transport backed by tokio channels.
//!
//! Useful for embedding the server in-process and for driving connections in
//! tests without a socket.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Inbound, Outbound};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::{SyncError, SyncResult};

/// Inbound half fed by a channel; `Err` items stand in for decode failures
pub struct ChannelInbound {
    receiver: mpsc::Receiver<SyncResult<ClientMessage>>,
}

impl ChannelInbound {
    pub fn new(capacity: usize) -> (Self, mpsc::Sender<SyncResult<ClientMessage>>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { receiver }, sender)
    }
}

#[async_trait]
impl Inbound for ChannelInbound {
    async fn receive(&mut self) -> Option<SyncResult<ClientMessage>> {
        self.receiver.recv().await
    }
}

/// Outbound half writing into a channel
///
/// `send` waits while the channel is full, like a socket whose peer stopped
/// reading.
pub struct ChannelOutbound {
    sender: Option<mpsc::Sender<ServerMessage>>,
}

impl ChannelOutbound {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }
}

#[async_trait]
impl Outbound for ChannelOutbound {
    async fn send(&mut self, message: &ServerMessage) -> SyncResult<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| SyncError::Transport("channel transport closed".to_string()))?;

        sender
            .send(message.clone())
            .await
            .map_err(|_| SyncError::Transport("peer hung up".to_string()))
    }

    async fn close(&mut self) {
        self.sender = None;
    }
}

/// The client side of an in-memory connection
pub struct RemoteClient {
    pub to_server: mpsc::Sender<SyncResult<ClientMessage>>,
    pub from_server: mpsc::Receiver<ServerMessage>,
}

impl RemoteClient {
    pub async fn send(&self, message: ClientMessage) -> bool {
        self.to_server.send(Ok(message)).await.is_ok()
    }

    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.from_server.recv().await
    }
}

/// Create both halves of an in-memory connection plus the client end
pub fn channel_transport(capacity: usize) -> (ChannelInbound, ChannelOutbound, RemoteClient) {
    let (inbound, to_server) = ChannelInbound::new(capacity);
    let (outbound, from_server) = ChannelOutbound::new(capacity);
    (
        inbound,
        outbound,
        RemoteClient {
            to_server,
            from_server,
        },
    )
}
