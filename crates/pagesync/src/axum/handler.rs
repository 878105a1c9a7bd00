use ::axum::extract::ws::{Message, WebSocket};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

use super::SyncState;
use crate::connection::{Inbound, Outbound};
use crate::protocol::{decode_message, encode_frame, ClientMessage, Frame, Framing, ServerMessage};
use crate::{SyncError, SyncResult};

/// Handles WebSocket connections for individual clients
pub struct WebSocketHandler {
    socket: WebSocket,
    state: SyncState,
}

impl WebSocketHandler {
    /// Create a new WebSocket handler
    pub fn new(socket: WebSocket, state: SyncState) -> Self {
        Self { socket, state }
    }

    /// Handle the WebSocket connection until it closes
    pub async fn handle(self) {
        let (ws_sender, ws_receiver) = self.socket.split();

        let inbound = WsInbound {
            receiver: ws_receiver,
        };
        let outbound = WsOutbound {
            sender: ws_sender,
            framing: self.state.framing(),
        };

        self.state.connections().run(inbound, outbound).await;
    }
}

/// Reading half of a WebSocket
pub struct WsInbound {
    receiver: SplitStream<WebSocket>,
}

#[async_trait]
impl Inbound for WsInbound {
    async fn receive(&mut self) -> Option<SyncResult<ClientMessage>> {
        while let Some(msg) = self.receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    return Some(serde_json::from_str(text.as_str()).map_err(SyncError::from));
                }
                Ok(Message::Binary(data)) => return Some(decode_message(&data)),
                Ok(Message::Close(_)) => {
                    debug!("WebSocket closed by peer");
                    return None;
                }
                // Axum answers pings itself
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Err(e) => {
                    warn!("WebSocket error: {}", e);
                    return None;
                }
            }
        }
        None
    }
}

/// Writing half of a WebSocket
pub struct WsOutbound {
    sender: SplitSink<WebSocket, Message>,
    framing: Framing,
}

#[async_trait]
impl Outbound for WsOutbound {
    async fn send(&mut self, message: &ServerMessage) -> SyncResult<()> {
        let frame = match encode_frame(message, self.framing)? {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(data) => Message::Binary(data.into()),
        };

        self.sender
            .send(frame)
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.sender.close().await {
            debug!("Error closing WebSocket: {}", e);
        }
    }
}
