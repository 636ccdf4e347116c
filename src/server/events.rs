//! WebSocket endpoint of the mock backend
//!
//! Each connection gets a `connected` acknowledgement, correlated replies to
//! its own requests, and every broadcast push (e.g. `fileUpdate`).

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};

use super::BackendState;
use crate::channel::InboundMessage;

/// Broadcasts push messages to all connected WebSocket clients
pub struct EventBroadcaster {
    tx: broadcast::Sender<InboundMessage>,
}

impl EventBroadcaster {
    /// Create a new event broadcaster with a channel capacity of 1000 events
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1000);
        Self { tx }
    }

    /// Broadcast a message to all connected clients
    pub fn broadcast(&self, message: InboundMessage) {
        // Ignore send errors (no receivers)
        let _ = self.tx.send(message);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InboundMessage> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<BackendState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection
async fn handle_websocket(socket: WebSocket, state: BackendState) {
    let (mut sender, mut receiver) = socket.split();
    let mut event_rx = state.broadcaster.subscribe();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<InboundMessage>();

    log::info!("[Backend] WebSocket client connected");
    let _ = reply_tx.send(InboundMessage::connected());

    // Replies and broadcasts share one writer
    let send_task = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                Some(reply) = reply_rx.recv() => reply,
                event = event_rx.recv() => match event {
                    Ok(push) => push,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("[Backend] Client lagged, {} push message(s) dropped", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };

            match message.to_text() {
                Ok(text) => {
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => log::warn!("[Backend] Failed to serialize message: {}", e),
            }
        }
    });

    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let reply = state.backend.handle_frame(text.as_str());
                if reply_tx.send(reply.response).is_err() {
                    break;
                }
                if let Some(push) = reply.broadcast {
                    state.broadcaster.broadcast(push);
                }
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                // Pong is handled automatically by axum
                log::trace!("[Backend] Ping/pong");
            }
            Ok(Message::Close(_)) => {
                log::info!("[Backend] WebSocket client disconnected");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                log::warn!("[Backend] WebSocket error: {}", e);
                break;
            }
        }
    }

    send_task.abort();
    log::info!("[Backend] WebSocket connection closed");
}
