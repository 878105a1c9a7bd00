use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

use super::{ClientId, Operation, Page};
use crate::broadcast::{BroadcastDispatcher, ClientHandle};
use crate::protocol::{PageSnapshot, ServerMessage, WireOp};
use crate::transform;
use crate::SyncResult;

#[derive(Default)]
struct SessionState {
    active: bool,
    pages: BTreeMap<u32, Page>,
    clients: HashMap<ClientId, ClientHandle>,
}

/// Outcome of applying one incoming operation
#[derive(Debug, Clone)]
pub struct Applied {
    /// The operation as transformed, clamped and logged
    pub operation: Operation,
    /// Page revision after the operation was logged
    pub revision: u64,
    /// Whether the page content changed (and the operation was broadcast)
    pub changed: bool,
    /// Clients dropped because their queue overflowed during fan-out
    pub dropped: Vec<ClientId>,
}

/// In-memory state of one document: its pages and the clients editing it
///
/// Pages, logs and the client set are only touched under a single lock, which
/// is what linearizes concurrent edits. Fan-out happens after that lock is
/// released.
pub struct DocumentSession {
    id: String,
    state: Mutex<SessionState>,
    // Held from just before the state lock is released until fan-out is done,
    // so queues receive operations in log order.
    fanout: Mutex<()>,
    dispatcher: BroadcastDispatcher,
}

impl DocumentSession {
    /// Create an empty session for the given document ID
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(SessionState::default()),
            fanout: Mutex::new(()),
            dispatcher: BroadcastDispatcher::new(),
        }
    }

    /// Get the document ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether any client has joined or any operation has been applied yet
    pub fn is_active(&self) -> bool {
        self.lock_state().active
    }

    /// Register a client and queue the current content of every page for it
    ///
    /// The `initial` message goes onto the client's queue before the session
    /// lock is released, so every operation broadcast afterwards reaches the
    /// client after its snapshot. Joining again with the same client replaces
    /// the earlier registration. Fails, without registering, when the
    /// client's queue does not accept the snapshot.
    pub fn join(&self, client: ClientHandle) -> SyncResult<Vec<PageSnapshot>> {
        let mut state = self.lock_state();

        let pages = snapshot_pages(&state.pages);
        client.enqueue(ServerMessage::Initial {
            document_id: self.id.clone(),
            pages: pages.clone(),
        })?;
        state.active = true;

        let client_id = client.id();
        if state.clients.insert(client_id, client).is_some() {
            debug!("Client {} re-joined document '{}'", client_id, self.id);
        } else {
            info!(
                "Client {} joined document '{}' ({} connected)",
                client_id,
                self.id,
                state.clients.len()
            );
        }

        Ok(pages)
    }

    /// Remove a client from the session
    ///
    /// Returns true if the client was a member.
    pub fn leave(&self, client_id: &ClientId) -> bool {
        let mut state = self.lock_state();
        match state.clients.remove(client_id) {
            Some(_) => {
                info!(
                    "Client {} left document '{}' ({} connected)",
                    client_id,
                    self.id,
                    state.clients.len()
                );
                true
            }
            None => false,
        }
    }

    /// Transform, apply and log an operation, then fan it out
    ///
    /// `revision` is the page revision the operation was computed against;
    /// `None` means the latest one. The operation is transformed past every
    /// entry logged since then, except the origin's own entries which the
    /// client has already seen. Operations that leave the content unchanged are
    /// logged but not broadcast.
    pub fn apply_incoming(&self, op: Operation, revision: Option<u64>) -> Applied {
        let origin = op.origin;
        let page_number = op.page_number;

        let mut state = self.lock_state();
        state.active = true;

        let page = state.pages.entry(page_number).or_default();
        let head = page.revision();
        let base = revision.map_or(head, |revision| revision.min(head));
        let concurrent = page
            .since(base)
            .iter()
            .filter(|prior| prior.origin != origin);
        let adjusted = transform::adjust(&op, concurrent, page.len());

        let changed = page.apply(adjusted.clone());
        let revision = page.revision();

        debug!(
            "Applied {:?} at {} on page {} of '{}' (requested {}, base {}, revision {})",
            adjusted.action, adjusted.position, page_number, self.id, op.position, base, revision
        );

        if !changed {
            return Applied {
                operation: adjusted,
                revision,
                changed,
                dropped: Vec::new(),
            };
        }

        let recipients: Vec<ClientHandle> = state
            .clients
            .values()
            .filter(|client| client.id() != origin)
            .cloned()
            .collect();

        // Blocking lock taken from async tasks; never hold it across an `.await`.
        let fanout = self.fanout.lock().unwrap_or_else(PoisonError::into_inner);
        drop(state);

        let message = ServerMessage::Operation {
            document_id: self.id.clone(),
            page_number,
            revision,
            ops: vec![WireOp::from(&adjusted)],
        };
        let dropped = self.dispatcher.publish(&recipients, &message);
        drop(fanout);

        for client_id in &dropped {
            self.leave(client_id);
        }

        Applied {
            operation: adjusted,
            revision,
            changed,
            dropped,
        }
    }

    /// Current content and revision of every page
    pub fn snapshot(&self) -> Vec<PageSnapshot> {
        snapshot_pages(&self.lock_state().pages)
    }

    /// Current content of a page, if it has ever been written to
    pub fn page_content(&self, page_number: u32) -> Option<String> {
        self.lock_state()
            .pages
            .get(&page_number)
            .map(|page| page.content().to_string())
    }

    /// Current revision of a page (zero for pages never written to)
    pub fn page_revision(&self, page_number: u32) -> u64 {
        self.lock_state()
            .pages
            .get(&page_number)
            .map_or(0, Page::revision)
    }

    /// The operation log of a page, in serialization order
    pub fn page_log(&self, page_number: u32) -> Vec<Operation> {
        self.lock_state()
            .pages
            .get(&page_number)
            .map(|page| page.log().to_vec())
            .unwrap_or_default()
    }

    /// Get the number of connected clients
    pub fn client_count(&self) -> usize {
        self.lock_state().clients.len()
    }

    /// Check whether a client is currently a member
    pub fn has_client(&self, client_id: &ClientId) -> bool {
        self.lock_state().clients.contains_key(client_id)
    }

    /// Fan-out counters for this document
    pub fn dispatcher(&self) -> &BroadcastDispatcher {
        &self.dispatcher
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn snapshot_pages(pages: &BTreeMap<u32, Page>) -> Vec<PageSnapshot> {
    pages
        .iter()
        .map(|(page_number, page)| PageSnapshot {
            page_number: *page_number,
            content: page.content().to_string(),
            revision: page.revision(),
        })
        .collect()
}

impl std::fmt::Debug for DocumentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentSession")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
