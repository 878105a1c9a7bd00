//! # pagesync - real-time collaborative editing of paged text documents
//!
//! Clients edit the pages of a shared document concurrently. Every operation
//! goes through its document's session, where it is transformed against the
//! edits the client had not yet seen, applied, logged, and fanned out to the
//! other clients over bounded per-client queues.
//!
//! The transport is pluggable through [`connection::Inbound`] and
//! [`connection::Outbound`]; the `axum` feature provides a WebSocket endpoint.

pub mod broadcast;
pub mod config;
pub mod connection;
pub mod document;
pub mod error;
pub mod protocol;
pub mod transform;

#[cfg(feature = "axum")]
pub mod axum;

// Re-exports for convenience
pub use broadcast::{BroadcastDispatcher, ClientHandle, DispatchStats};
pub use crate::config::SyncConfig;
pub use connection::{Connection, ConnectionManager, ConnectionState, Inbound, Outbound};
pub use document::{
    Action, Applied, ClientId, DocumentRegistry, DocumentSession, Operation, Page,
};
pub use error::{SyncError, SyncResult};
pub use protocol::{ClientMessage, Framing, PageSnapshot, ServerMessage, WireOp};

#[cfg(feature = "axum")]
pub use crate::axum::{router_with_sync, router_with_sync_state, SyncState, WebSocketHandler};
