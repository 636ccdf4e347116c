//! Duplex message channel to the coding backend
//!
//! One WebSocket connection carries typed JSON requests out and typed,
//! correlated responses back. Messages sent while disconnected are queued and
//! flushed in FIFO order once the socket opens. Reconnection is lazy: the next
//! request after a close triggers a fresh `connect()`.
//!
//! Responses are matched to requests by `requestId`. When the backend omits the
//! id, the oldest pending request expecting that response type wins.

mod error;
mod message;

pub use error::ChannelError;
pub use message::{InboundMessage, OutboundMessage};

use crate::config::BackendConfig;
use crate::events::{MSG_CONNECTED, MSG_ERROR};
use crate::utils::{generate_id, lock_mutex_recover};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Connection and timing settings for a channel
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub url: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub connect_poll: Duration,
}

impl ChannelConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self::from(&BackendConfig {
            ws_url: url.into(),
            ..BackendConfig::default()
        })
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

impl From<&BackendConfig> for ChannelConfig {
    fn from(backend: &BackendConfig) -> Self {
        Self {
            url: backend.ws_url.clone(),
            request_timeout: backend.request_timeout(),
            connect_timeout: backend.connect_timeout(),
            connect_poll: backend.connect_poll(),
        }
    }
}

/// Lifecycle of the underlying socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// A request awaiting its correlated response
struct PendingRequest {
    id: String,
    expected: String,
    responder: oneshot::Sender<Result<Value, ChannelError>>,
}

struct ChannelInner {
    state: ConnectionState,
    /// Bumped on every open and every explicit disconnect; stale reader tasks
    /// compare against it before touching shared state.
    connection_id: u64,
    writer: Option<mpsc::UnboundedSender<Message>>,
    queue: VecDeque<OutboundMessage>,
    pending: Vec<PendingRequest>,
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<InboundMessage>>>,
    reader_task: Option<JoinHandle<()>>,
}

impl ChannelInner {
    fn take_pending(&mut self, request_id: &str) -> Option<PendingRequest> {
        let index = self.pending.iter().position(|p| p.id == request_id)?;
        Some(self.pending.remove(index))
    }

    /// Find the pending request an inbound message answers
    fn correlate(&mut self, message: &InboundMessage) -> Option<PendingRequest> {
        let accepts = |p: &PendingRequest| p.expected == message.kind || message.kind == MSG_ERROR;

        let index = match &message.request_id {
            Some(id) => self.pending.iter().position(|p| &p.id == id && accepts(p)),
            None => self.pending.iter().position(accepts),
        }?;
        Some(self.pending.remove(index))
    }

    fn reject_all_pending(&mut self, reason: &str) {
        for pending in self.pending.drain(..) {
            let _ = pending
                .responder
                .send(Err(ChannelError::Closed(reason.to_string())));
        }
    }

    fn publish(&mut self, message: &InboundMessage) -> bool {
        let Some(senders) = self.subscribers.get_mut(&message.kind) else {
            return false;
        };
        senders.retain(|tx| tx.send(message.clone()).is_ok());
        !senders.is_empty()
    }
}

/// Handle to the backend message channel. Cheap to clone; clones share the
/// same connection, queue and pending requests.
#[derive(Clone)]
pub struct MessageChannel {
    config: ChannelConfig,
    inner: Arc<Mutex<ChannelInner>>,
}

impl MessageChannel {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(ChannelInner {
                state: ConnectionState::Disconnected,
                connection_id: 0,
                writer: None,
                queue: VecDeque::new(),
                pending: Vec::new(),
                subscribers: HashMap::new(),
                reader_task: None,
            })),
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        lock_mutex_recover(&self.inner).state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Number of messages waiting for the socket to open
    pub fn queued_len(&self) -> usize {
        lock_mutex_recover(&self.inner).queue.len()
    }

    /// Number of requests waiting for a response
    pub fn pending_len(&self) -> usize {
        lock_mutex_recover(&self.inner).pending.len()
    }

    /// Open the connection if needed.
    ///
    /// Returns immediately when already connected. When another caller is
    /// mid-attempt, waits for that attempt up to the connect timeout.
    pub async fn connect(&self) -> Result<(), ChannelError> {
        let attempt_id = {
            let mut inner = lock_mutex_recover(&self.inner);
            match inner.state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting => None,
                ConnectionState::Disconnected => {
                    inner.state = ConnectionState::Connecting;
                    Some(inner.connection_id)
                }
            }
        };

        match attempt_id {
            Some(attempt_id) => self.open(attempt_id).await,
            None => self.wait_for_attempt().await,
        }
    }

    async fn wait_for_attempt(&self) -> Result<(), ChannelError> {
        let deadline = Instant::now() + self.config.connect_timeout;

        loop {
            match self.state() {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Disconnected => {
                    return Err(ChannelError::Connect {
                        url: self.config.url.clone(),
                        reason: "concurrent connection attempt failed".to_string(),
                    })
                }
                ConnectionState::Connecting => {}
            }

            if Instant::now() >= deadline {
                return Err(ChannelError::ConnectTimeout {
                    url: self.config.url.clone(),
                    after: self.config.connect_timeout,
                });
            }
            tokio::time::sleep(self.config.connect_poll).await;
        }
    }

    async fn open(&self, attempt_id: u64) -> Result<(), ChannelError> {
        log::debug!("[Channel] Connecting to {}", self.config.url);

        let stream = match timeout(self.config.connect_timeout, connect_async(self.config.url.as_str())).await {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                self.abandon_attempt(attempt_id);
                log::warn!("[Channel] Failed to connect to {}: {}", self.config.url, e);
                return Err(ChannelError::Connect {
                    url: self.config.url.clone(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                self.abandon_attempt(attempt_id);
                log::warn!(
                    "[Channel] Connection to {} not established within {:?}",
                    self.config.url,
                    self.config.connect_timeout
                );
                return Err(ChannelError::ConnectTimeout {
                    url: self.config.url.clone(),
                    after: self.config.connect_timeout,
                });
            }
        };

        let (mut sink, mut source) = stream.split();
        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Message>();

        {
            let mut inner = lock_mutex_recover(&self.inner);
            if inner.state != ConnectionState::Connecting || inner.connection_id != attempt_id {
                return Err(ChannelError::Closed(
                    "Disconnected while the connection was opening".to_string(),
                ));
            }

            // Queued frames go to the writer before anything sent after open
            let mut flushed = 0;
            while let Some(message) = inner.queue.pop_front() {
                match message.to_text() {
                    Ok(text) => {
                        let _ = writer_tx.send(Message::Text(text.into()));
                        flushed += 1;
                    }
                    Err(e) => log::warn!("[Channel] Dropping unserializable queued message: {}", e),
                }
            }
            if flushed > 0 {
                log::debug!("[Channel] Flushed {} queued message(s)", flushed);
            }

            inner.connection_id += 1;
            inner.state = ConnectionState::Connected;
            inner.writer = Some(writer_tx);
        }

        tokio::spawn(async move {
            while let Some(frame) = writer_rx.recv().await {
                if let Err(e) = sink.send(frame).await {
                    log::warn!("[Channel] Write failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let connection_id = lock_mutex_recover(&self.inner).connection_id;
        let weak = Arc::downgrade(&self.inner);
        let reader = tokio::spawn(async move {
            let reason = loop {
                match source.next().await {
                    Some(Ok(Message::Text(text))) => dispatch(&weak, connection_id, text.as_str()),
                    Some(Ok(Message::Close(frame))) => {
                        break frame
                            .map(|f| format!("closed by peer ({})", f.code))
                            .unwrap_or_else(|| "closed by peer".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break format!("read error: {}", e),
                    None => break "stream ended".to_string(),
                }
            };
            handle_close(&weak, connection_id, &reason);
        });

        {
            let mut inner = lock_mutex_recover(&self.inner);
            if inner.connection_id == connection_id {
                inner.reader_task = Some(reader);
            } else {
                reader.abort();
            }
        }

        log::info!("[Channel] Connected to {}", self.config.url);
        Ok(())
    }

    fn abandon_attempt(&self, attempt_id: u64) {
        let mut inner = lock_mutex_recover(&self.inner);
        if inner.state == ConnectionState::Connecting && inner.connection_id == attempt_id {
            inner.state = ConnectionState::Disconnected;
        }
    }

    /// Send a message now if connected, otherwise queue it for the next open
    pub fn send(&self, message: OutboundMessage) -> Result<(), ChannelError> {
        let text = message.to_text()?;
        let mut inner = lock_mutex_recover(&self.inner);

        if inner.state == ConnectionState::Connected {
            if let Some(writer) = &inner.writer {
                if writer.send(Message::Text(text.into())).is_ok() {
                    return Ok(());
                }
            }
            // Writer is gone; the reader will report the close shortly
            inner.writer = None;
        }

        log::debug!("[Channel] Queueing '{}' until connected", message.kind);
        inner.queue.push_back(message);
        Ok(())
    }

    /// Send a request and wait for its correlated response.
    ///
    /// Resolves with the response `data` on success. Rejects with a
    /// connectivity error when the socket cannot be opened, `Remote` when
    /// the backend reports failure, and `Timeout` when nothing arrives in
    /// time. Exactly one of these happens per call.
    pub async fn request<T: Serialize>(
        &self,
        kind: &str,
        expected: &str,
        payload: &T,
    ) -> Result<Value, ChannelError> {
        let request_id = generate_id();
        let message = OutboundMessage::with_payload(kind, payload)?.with_request_id(request_id.clone());
        let (responder, mut response) = oneshot::channel();

        // Register before sending so a same-tick response cannot be missed
        lock_mutex_recover(&self.inner).pending.push(PendingRequest {
            id: request_id.clone(),
            expected: expected.to_string(),
            responder,
        });

        if let Err(e) = self.send(message) {
            self.forget(&request_id);
            return Err(e);
        }

        if let Err(e) = self.connect().await {
            self.forget(&request_id);
            return Err(e);
        }

        match timeout(self.config.request_timeout, &mut response).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ChannelError::Closed("Response handler dropped".to_string())),
            Err(_) => {
                let removed = lock_mutex_recover(&self.inner).take_pending(&request_id);
                if removed.is_some() {
                    log::warn!(
                        "[Channel] '{}' ({}) timed out after {:?}",
                        kind,
                        request_id,
                        self.config.request_timeout
                    );
                    Err(ChannelError::Timeout {
                        request_type: kind.to_string(),
                        expected: expected.to_string(),
                        after: self.config.request_timeout,
                    })
                } else {
                    // A response won the race after the deadline
                    response
                        .await
                        .unwrap_or_else(|_| Err(ChannelError::Closed("Response handler dropped".to_string())))
                }
            }
        }
    }

    /// Drop a request that never made it onto the wire
    fn forget(&self, request_id: &str) {
        let mut inner = lock_mutex_recover(&self.inner);
        inner.take_pending(request_id);
        inner
            .queue
            .retain(|m| m.request_id.as_deref() != Some(request_id));
    }

    /// Receive every uncorrelated message of the given type
    pub fn subscribe(&self, kind: &str) -> mpsc::UnboundedReceiver<InboundMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock_mutex_recover(&self.inner)
            .subscribers
            .entry(kind.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// Close the socket. Pending requests fail with `Closed`; queued messages
    /// stay queued for the next connect.
    pub fn disconnect(&self) {
        let reader = {
            let mut inner = lock_mutex_recover(&self.inner);
            if inner.state == ConnectionState::Disconnected {
                return;
            }
            inner.connection_id += 1;
            inner.state = ConnectionState::Disconnected;
            inner.writer = None;
            inner.reject_all_pending("Disconnected by client");
            inner.reader_task.take()
        };

        if let Some(reader) = reader {
            reader.abort();
        }
        log::info!("[Channel] Disconnected from {}", self.config.url);
    }
}

/// Route one inbound text frame
fn dispatch(inner: &Weak<Mutex<ChannelInner>>, connection_id: u64, text: &str) {
    let message = match InboundMessage::parse(text) {
        Ok(message) => message,
        Err(e) => {
            log::warn!("[Channel] Dropping frame: {}", e);
            return;
        }
    };

    if message.kind == MSG_CONNECTED {
        log::debug!("[Channel] Backend acknowledged connection");
        return;
    }

    let Some(inner) = inner.upgrade() else {
        return;
    };

    let pending = {
        let mut guard = lock_mutex_recover(&inner);
        if guard.connection_id != connection_id {
            return;
        }

        match guard.correlate(&message) {
            Some(pending) => pending,
            None => {
                if !guard.publish(&message) {
                    match &message.request_id {
                        Some(id) => log::debug!(
                            "[Channel] Dropping stale '{}' response for {}",
                            message.kind,
                            id
                        ),
                        None => log::debug!("[Channel] No handler for '{}'", message.kind),
                    }
                }
                return;
            }
        }
    };

    let outcome = message.into_outcome();
    if pending.responder.send(outcome).is_err() {
        log::debug!("[Channel] Request {} was abandoned before its response", pending.id);
    }
}

fn handle_close(inner: &Weak<Mutex<ChannelInner>>, connection_id: u64, reason: &str) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let mut guard = lock_mutex_recover(&inner);
    if guard.connection_id != connection_id {
        return;
    }

    log::warn!("[Channel] Connection lost: {}", reason);
    guard.state = ConnectionState::Disconnected;
    guard.writer = None;
    guard.reader_task = None;
    guard.reject_all_pending(reason);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MSG_RUN_TEST;
    use serde_json::json;

    fn offline_channel() -> MessageChannel {
        // Port 9 (discard) on localhost is not listening in test environments
        MessageChannel::new(
            ChannelConfig::new("ws://127.0.0.1:9/ws")
                .with_connect_timeout(Duration::from_millis(500))
                .with_request_timeout(Duration::from_millis(500)),
        )
    }

    #[test]
    fn test_config_from_backend() {
        let config = ChannelConfig::from(&BackendConfig::default());
        assert_eq!(config.url, "ws://127.0.0.1:3421/ws");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.connect_poll, Duration::from_millis(100));
    }

    #[test]
    fn test_send_while_disconnected_queues() {
        let channel = offline_channel();
        channel.send(OutboundMessage::new(MSG_RUN_TEST)).unwrap();
        channel.send(OutboundMessage::new("updateCode")).unwrap();

        assert_eq!(channel.state(), ConnectionState::Disconnected);
        assert_eq!(channel.queued_len(), 2);
    }

    #[test]
    fn test_correlate_prefers_request_id() {
        let (tx_a, _rx_a) = oneshot::channel();
        let (tx_b, _rx_b) = oneshot::channel();

        let channel = offline_channel();
        let mut guard = lock_mutex_recover(&channel.inner);
        guard.pending.push(PendingRequest {
            id: "a".to_string(),
            expected: "testResult".to_string(),
            responder: tx_a,
        });
        guard.pending.push(PendingRequest {
            id: "b".to_string(),
            expected: "testResult".to_string(),
            responder: tx_b,
        });

        let by_id: InboundMessage =
            serde_json::from_value(json!({"type": "testResult", "requestId": "b", "success": true}))
                .unwrap();
        assert_eq!(guard.correlate(&by_id).unwrap().id, "b");

        let stale: InboundMessage =
            serde_json::from_value(json!({"type": "testResult", "requestId": "zzz"})).unwrap();
        assert!(guard.correlate(&stale).is_none());

        let untagged: InboundMessage =
            serde_json::from_value(json!({"type": "testResult", "success": true})).unwrap();
        assert_eq!(guard.correlate(&untagged).unwrap().id, "a");
        assert!(guard.pending.is_empty());
    }

    #[test]
    fn test_correlate_generic_error_takes_oldest() {
        let channel = offline_channel();
        let mut guard = lock_mutex_recover(&channel.inner);
        for (id, expected) in [("first", "cursorResponse"), ("second", "testResult")] {
            let (tx, _rx) = oneshot::channel();
            guard.pending.push(PendingRequest {
                id: id.to_string(),
                expected: expected.to_string(),
                responder: tx,
            });
        }

        let error: InboundMessage =
            serde_json::from_value(json!({"type": "error", "error": "boom"})).unwrap();
        assert_eq!(guard.correlate(&error).unwrap().id, "first");
    }

    #[tokio::test]
    async fn test_request_rejects_when_unreachable() {
        let channel = offline_channel();
        let err = channel
            .request(MSG_RUN_TEST, "testResult", &json!({"testId": 1}))
            .await
            .unwrap_err();

        assert!(err.is_connectivity(), "unexpected error: {}", err);
        assert!(!err.to_string().contains("timed out"));
        assert_eq!(channel.pending_len(), 0);
        assert_eq!(channel.queued_len(), 0);
        assert_eq!(channel.state(), ConnectionState::Disconnected);
    }
}
