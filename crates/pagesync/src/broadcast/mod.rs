//! Fan-out of applied operations to connected clients.
//!
//! Every client owns a bounded outbound queue drained by its own delivery loop.
//! Publishers only ever `try_send` onto those queues, so a slow or stalled
//! client can never hold up the document it belongs to. A client whose queue
//! is full is considered unreachable and is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::connection::Outbound;
use crate::document::ClientId;
use crate::protocol::ServerMessage;
use crate::{SyncError, SyncResult};

struct ClientInner {
    id: ClientId,
    outbound: mpsc::Sender<ServerMessage>,
    closed: watch::Sender<bool>,
}

/// A cheap, cloneable handle to one connected client's outbound queue
#[derive(Clone)]
pub struct ClientHandle {
    inner: Arc<ClientInner>,
}

impl ClientHandle {
    /// Create a handle with a fresh id and a queue holding up to `capacity` messages
    ///
    /// The returned receiver belongs to the client's delivery loop.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (outbound, receiver) = mpsc::channel(capacity.max(1));
        let (closed, _) = watch::channel(false);

        let handle = Self {
            inner: Arc::new(ClientInner {
                id: Uuid::new_v4(),
                outbound,
                closed,
            }),
        };
        (handle, receiver)
    }

    pub fn id(&self) -> ClientId {
        self.inner.id
    }

    /// Queue a message without waiting
    ///
    /// Fails when the queue is full or the client has been closed.
    pub fn enqueue(&self, message: ServerMessage) -> SyncResult<()> {
        if self.is_closed() {
            return Err(SyncError::Transport(format!(
                "client {} is closed",
                self.inner.id
            )));
        }

        self.inner.outbound.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                SyncError::Transport(format!("outbound queue full for client {}", self.inner.id))
            }
            mpsc::error::TrySendError::Closed(_) => SyncError::Transport(format!(
                "outbound queue closed for client {}",
                self.inner.id
            )),
        })
    }

    /// Mark the client as unreachable; its delivery loop and connection stop
    pub fn close(&self) {
        self.inner.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    /// Resolves once [`ClientHandle::close`] has been called
    pub async fn closed(&self) {
        let mut closed = self.inner.closed.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = closed.wait_for(|closed| *closed).await;
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Counters describing fan-out health
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub messages_enqueued: u64,
    pub clients_dropped: u64,
}

/// Enqueues messages onto client queues, dropping clients that cannot keep up
#[derive(Debug, Default)]
pub struct BroadcastDispatcher {
    messages_enqueued: AtomicU64,
    clients_dropped: AtomicU64,
}

impl BroadcastDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `message` for every recipient
    ///
    /// Never waits. Recipients whose queue is full or closed are closed and
    /// their ids returned so the caller can remove them from its client set.
    pub fn publish(&self, recipients: &[ClientHandle], message: &ServerMessage) -> Vec<ClientId> {
        let mut dropped = Vec::new();

        for client in recipients {
            match client.enqueue(message.clone()) {
                Ok(()) => {
                    self.messages_enqueued.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!("Dropping unreachable client {}: {}", client.id(), e);
                    client.close();
                    self.clients_dropped.fetch_add(1, Ordering::Relaxed);
                    dropped.push(client.id());
                }
            }
        }

        dropped
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            messages_enqueued: self.messages_enqueued.load(Ordering::Relaxed),
            clients_dropped: self.clients_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Drain a client's queue into its transport until the client goes away
///
/// A failed write closes the handle, which makes the owning connection leave
/// its document.
pub async fn deliver<O: Outbound>(
    client: ClientHandle,
    mut receiver: mpsc::Receiver<ServerMessage>,
    mut sink: O,
) {
    loop {
        tokio::select! {
            biased;
            _ = client.closed() => break,
            message = receiver.recv() => {
                let Some(message) = message else { break };
                // A write to a stalled peer must not outlive the client.
                let sent = tokio::select! {
                    biased;
                    _ = client.closed() => break,
                    sent = sink.send(&message) => sent,
                };
                if let Err(e) = sent {
                    warn!("Failed to deliver message to client {}: {}", client.id(), e);
                    client.close();
                    break;
                }
            }
        }
    }

    sink.close().await;
    debug!("Delivery loop ended for client {}", client.id());
}
