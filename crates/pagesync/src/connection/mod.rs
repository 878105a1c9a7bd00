//! Binding of transport connections to document sessions.
//!
//! A connection moves through `Connecting -> Joined(document) -> Closed`. The
//! transport is only seen through the [`Inbound`] and [`Outbound`] traits, so
//! the same state machine drives WebSockets and in-memory channels alike.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::broadcast::{deliver, ClientHandle};
use crate::config::SyncConfig;
use crate::document::{DocumentRegistry, DocumentSession, Operation};
use crate::protocol::{ClientMessage, ServerMessage, WireOp};
use crate::{SyncError, SyncResult};

pub mod memory;

/// Receiving half of a transport
#[async_trait]
pub trait Inbound: Send {
    /// Next decoded message; `None` once the transport is closed and
    /// `Some(Err(_))` when a frame could not be decoded
    async fn receive(&mut self) -> Option<SyncResult<ClientMessage>>;
}

/// Sending half of a transport
#[async_trait]
pub trait Outbound: Send + 'static {
    async fn send(&mut self, message: &ServerMessage) -> SyncResult<()>;

    async fn close(&mut self);
}

/// Where a connection is in its lifetime
#[derive(Debug, Clone)]
pub enum ConnectionState {
    Connecting,
    Joined(Arc<DocumentSession>),
    Closed,
}

/// Per-connection protocol state
///
/// Handles one decoded message at a time. Nothing here waits: replies go onto
/// the client's outbound queue.
pub struct Connection {
    client: ClientHandle,
    state: ConnectionState,
}

impl Connection {
    pub fn new(client: ClientHandle) -> Self {
        Self {
            client,
            state: ConnectionState::Connecting,
        }
    }

    pub fn client(&self) -> &ClientHandle {
        &self.client
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// ID of the joined document, if any
    pub fn document_id(&self) -> Option<&str> {
        match &self.state {
            ConnectionState::Joined(session) => Some(session.id()),
            _ => None,
        }
    }

    /// Handle one message from the client
    pub fn handle_message(&mut self, registry: &DocumentRegistry, message: ClientMessage) {
        let result = match message {
            ClientMessage::Connect { document_id, .. } => self.connect(registry, &document_id),
            ClientMessage::Operation {
                document_id,
                page_number,
                revision,
                ops,
            } => self.apply(&document_id, page_number, revision, ops),
        };

        if let Err(e) = result {
            warn!("Error handling message from client {}: {}", self.client.id(), e);
            self.reply(ServerMessage::Error {
                message: format!("Error processing message: {}", e),
            });
        }
    }

    fn connect(&mut self, registry: &DocumentRegistry, document_id: &str) -> SyncResult<()> {
        let switching = self
            .document_id()
            .is_some_and(|current| current != document_id);
        if switching {
            self.leave();
        }

        let session = registry.get_or_create(document_id);
        // The session queues the initial snapshot itself.
        let pages = session.join(self.client.clone())?;
        debug!(
            "Client {} connected to document '{}' ({} pages)",
            self.client.id(),
            document_id,
            pages.len()
        );

        self.state = ConnectionState::Joined(session);
        Ok(())
    }

    fn apply(
        &mut self,
        document_id: &str,
        page_number: i64,
        revision: Option<u64>,
        ops: Vec<WireOp>,
    ) -> SyncResult<()> {
        let session = match &self.state {
            ConnectionState::Joined(session) if session.id() == document_id => session.clone(),
            _ => {
                return Err(SyncError::NotJoined {
                    document_id: document_id.to_string(),
                })
            }
        };

        // Reject the whole batch before applying any of it.
        let origin = self.client.id();
        let ops = ops
            .into_iter()
            .map(|op| {
                let base = op.base_revision(page_number, revision)?;
                Ok((op.into_operation(page_number, origin)?, base))
            })
            .collect::<SyncResult<Vec<(Operation, Option<u64>)>>>()?;

        let mut revisions = BTreeMap::new();
        for (op, base) in ops {
            let page = op.page_number;
            let applied = session.apply_incoming(op, base);
            revisions.insert(page, applied.revision);
        }

        for (page_number, revision) in revisions {
            self.reply(ServerMessage::Ack {
                document_id: document_id.to_string(),
                page_number,
                revision,
            });
        }

        Ok(())
    }

    /// Leave the current document, if any, and stop accepting messages
    pub fn close(&mut self) {
        self.leave();
        self.state = ConnectionState::Closed;
    }

    fn leave(&mut self) {
        if let ConnectionState::Joined(session) = &self.state {
            session.leave(&self.client.id());
        }
        self.state = ConnectionState::Connecting;
    }

    fn reply(&self, message: ServerMessage) {
        if let Err(e) = self.client.enqueue(message) {
            warn!("Failed to queue reply for client {}: {}", self.client.id(), e);
            self.client.close();
        }
    }
}

/// Runs connections against a shared [`DocumentRegistry`]
#[derive(Clone)]
pub struct ConnectionManager {
    registry: Arc<DocumentRegistry>,
    queue_capacity: usize,
}

impl ConnectionManager {
    pub fn new(registry: Arc<DocumentRegistry>, config: &SyncConfig) -> Self {
        Self {
            registry,
            queue_capacity: config.outbound_queue_capacity,
        }
    }

    pub fn registry(&self) -> &Arc<DocumentRegistry> {
        &self.registry
    }

    /// Drive one connection until it closes
    ///
    /// Spawns the client's delivery loop over `outbound` and reads `inbound`
    /// until the transport closes, a frame fails to decode, or the client is
    /// dropped for falling behind. The client leaves its document on the way
    /// out.
    pub async fn run<I, O>(&self, mut inbound: I, outbound: O)
    where
        I: Inbound,
        O: Outbound,
    {
        let (client, receiver) = ClientHandle::new(self.queue_capacity);
        let client_id = client.id();
        info!("New connection established for client {}", client_id);

        let delivery = tokio::spawn(deliver(client.clone(), receiver, outbound));
        let mut connection = Connection::new(client.clone());

        let reason = loop {
            let next = tokio::select! {
                biased;
                _ = client.closed() => break "client dropped",
                next = inbound.receive() => next,
            };

            match next {
                Some(Ok(message)) => connection.handle_message(&self.registry, message),
                Some(Err(e)) => {
                    warn!("Failed to decode message from client {}: {}", client_id, e);
                    break "decode failure";
                }
                None => break "transport closed",
            }
        };

        info!("Connection ending for client {} ({})", client_id, reason);

        connection.close();
        client.close();
        if let Err(e) = delivery.await {
            error!("Delivery task for client {} failed: {}", client_id, e);
        }

        info!("Client {} fully disconnected and cleaned up", client_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn joined(
        registry: &DocumentRegistry,
        document_id: &str,
    ) -> (Connection, mpsc::Receiver<ServerMessage>) {
        let (client, rx) = ClientHandle::new(16);
        let mut connection = Connection::new(client);
        connection.handle_message(
            registry,
            ClientMessage::Connect {
                document_id: document_id.to_string(),
                page_number: 0,
            },
        );
        (connection, rx)
    }

    fn insert(position: i64, content: &str) -> WireOp {
        WireOp {
            action: crate::document::Action::Insert,
            content: content.to_string(),
            position,
            length: 0,
            page_number: None,
            revision: None,
            attributes: Default::default(),
        }
    }

    #[test]
    fn test_connect_replies_with_initial() {
        let registry = DocumentRegistry::new();
        let (connection, mut rx) = joined(&registry, "book");

        assert_eq!(connection.document_id(), Some("book"));
        assert!(matches!(
            rx.try_recv(),
            Ok(ServerMessage::Initial { ref document_id, ref pages }) if document_id == "book" && pages.is_empty()
        ));
    }

    #[test]
    fn test_operation_before_connect_is_rejected() {
        let registry = DocumentRegistry::new();
        let (client, mut rx) = ClientHandle::new(16);
        let mut connection = Connection::new(client);

        connection.handle_message(
            &registry,
            ClientMessage::Operation {
                document_id: "book".to_string(),
                page_number: 0,
                revision: None,
                ops: vec![insert(0, "x")],
            },
        );

        assert!(matches!(rx.try_recv(), Ok(ServerMessage::Error { .. })));
        assert_eq!(registry.document_count(), 0);
    }

    #[test]
    fn test_operation_acks_with_revision() {
        let registry = DocumentRegistry::new();
        let (mut connection, mut rx) = joined(&registry, "book");
        let _initial = rx.try_recv();

        connection.handle_message(
            &registry,
            ClientMessage::Operation {
                document_id: "book".to_string(),
                page_number: 2,
                revision: Some(0),
                ops: vec![insert(0, "ab"), insert(2, "cd")],
            },
        );

        match rx.try_recv() {
            Ok(ServerMessage::Ack {
                page_number,
                revision,
                ..
            }) => {
                assert_eq!(page_number, 2);
                assert_eq!(revision, 2);
            }
            other => panic!("Expected Ack, got {:?}", other),
        }
        let session = registry.get("book").unwrap();
        assert_eq!(session.page_content(2).unwrap(), "abcd");
    }

    #[test]
    fn test_batch_spanning_pages_uses_per_page_revisions() {
        let registry = DocumentRegistry::new();
        let session = registry.get_or_create("book");
        for _ in 0..5 {
            session.apply_incoming(Operation::insert(0, 0, "-"), None);
        }
        session.apply_incoming(Operation::insert(2, 0, "abc"), None);
        session.apply_incoming(Operation::insert(2, 0, "XYZ"), None);

        let (mut connection, mut rx) = joined(&registry, "book");
        let _initial = rx.try_recv();

        // Knows page 0 at revision 5 but page 2 only at revision 1.
        let mut on_page_two = insert(3, "!");
        on_page_two.page_number = Some(2);
        on_page_two.revision = Some(1);
        connection.handle_message(
            &registry,
            ClientMessage::Operation {
                document_id: "book".to_string(),
                page_number: 0,
                revision: Some(5),
                ops: vec![insert(0, "."), on_page_two],
            },
        );

        assert_eq!(session.page_content(0).unwrap(), ".-----");
        assert_eq!(session.page_content(2).unwrap(), "XYZabc!");
        assert!(matches!(rx.try_recv(), Ok(ServerMessage::Ack { page_number: 0, revision: 6, .. })));
        assert!(matches!(rx.try_recv(), Ok(ServerMessage::Ack { page_number: 2, revision: 3, .. })));
    }

    #[test]
    fn test_other_page_without_revision_rejects_batch() {
        let registry = DocumentRegistry::new();
        let (mut connection, mut rx) = joined(&registry, "book");
        let _initial = rx.try_recv();

        let mut on_page_two = insert(0, "!");
        on_page_two.page_number = Some(2);
        connection.handle_message(
            &registry,
            ClientMessage::Operation {
                document_id: "book".to_string(),
                page_number: 0,
                revision: Some(0),
                ops: vec![insert(0, "."), on_page_two],
            },
        );

        assert!(matches!(rx.try_recv(), Ok(ServerMessage::Error { .. })));
        let session = registry.get("book").unwrap();
        assert_eq!(session.page_revision(0), 0);
        assert_eq!(session.page_revision(2), 0);
    }

    #[test]
    fn test_invalid_page_rejects_whole_batch() {
        let registry = DocumentRegistry::new();
        let (mut connection, mut rx) = joined(&registry, "book");
        let _initial = rx.try_recv();

        let mut bad = insert(0, "y");
        bad.page_number = Some(-3);
        connection.handle_message(
            &registry,
            ClientMessage::Operation {
                document_id: "book".to_string(),
                page_number: 0,
                revision: None,
                ops: vec![insert(0, "x"), bad],
            },
        );

        assert!(matches!(rx.try_recv(), Ok(ServerMessage::Error { .. })));
        assert_eq!(registry.get("book").unwrap().page_revision(0), 0);
    }

    #[test]
    fn test_connect_to_other_document_leaves_previous() {
        let registry = DocumentRegistry::new();
        let (mut connection, _rx) = joined(&registry, "first");
        let client_id = connection.client().id();

        connection.handle_message(
            &registry,
            ClientMessage::Connect {
                document_id: "second".to_string(),
                page_number: 0,
            },
        );

        assert!(!registry.get("first").unwrap().has_client(&client_id));
        assert!(registry.get("second").unwrap().has_client(&client_id));

        connection.close();
        assert!(matches!(connection.state(), ConnectionState::Closed));
        assert!(!registry.get("second").unwrap().has_client(&client_id));
    }
}
