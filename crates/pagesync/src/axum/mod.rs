use ::axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Router,
};
use std::sync::Arc;

pub mod handler;

pub use handler::WebSocketHandler;

use crate::config::SyncConfig;
use crate::connection::ConnectionManager;
use crate::document::DocumentRegistry;
use crate::protocol::Framing;

/// Axum state wrapper for pagesync
#[derive(Clone)]
pub struct SyncState {
    connections: ConnectionManager,
    framing: Framing,
}

impl SyncState {
    /// Create a new state serving the documents in `registry`
    pub fn new(registry: Arc<DocumentRegistry>, config: &SyncConfig) -> Self {
        Self {
            connections: ConnectionManager::new(registry, config),
            framing: config.framing,
        }
    }

    /// Get the document registry
    pub fn registry(&self) -> &Arc<DocumentRegistry> {
        self.connections.registry()
    }

    /// Get the connection manager
    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// Framing used for outbound frames
    pub fn framing(&self) -> Framing {
        self.framing
    }
}

/// Create a router with the WebSocket endpoint mounted at `config.ws_path`
pub fn router_with_sync(registry: Arc<DocumentRegistry>, config: &SyncConfig) -> Router {
    router_with_sync_state(SyncState::new(registry, config), &config.ws_path)
}

/// Create a router with the WebSocket endpoint using an existing SyncState
///
/// This is useful when the same registry is also read from other routes of the
/// application.
pub fn router_with_sync_state(state: SyncState, path: &str) -> Router {
    Router::new()
        .route(path, get(websocket_handler))
        .with_state(state)
}

/// WebSocket handler endpoint
async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<SyncState>) -> Response {
    ws.on_upgrade(move |socket| WebSocketHandler::new(socket, state).handle())
}
