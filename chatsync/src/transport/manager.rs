//! Persistent WebSocket connection with request/response correlation.
//!
//! [`TransportManager`] owns one logical connection to the backend. A
//! supervisor task connects, runs the reader loop, and reconnects with
//! exponential backoff until [`TransportManager::disconnect`] is called.
//!
//! Outbound requests carry a fresh correlation id and wait for the frame
//! typed `<request>_response` with the same id. Every other inbound frame
//! is broadcast to the registered subscribers. Pending requests are
//! rejected exactly once: by their response, their timeout, a connection
//! drop, or an intentional disconnect, whichever happens first.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{Notify, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use uuid::Uuid;

use chatsync_proto::codec::{self, Envelope};
use chatsync_proto::request::RequestKind;

use super::backoff::Backoff;
use super::target::ConnectTarget;
use super::{ChannelType, ConnectionState, RequestChannel, RequestError};
use crate::config::TransportConfig;

/// Type alias for the write half of a WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of a WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Callback invoked for every inbound broadcast envelope.
pub type EventHandler = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Callback invoked after every successful reconnection.
pub type ReconnectHandler = Arc<dyn Fn() + Send + Sync>;

/// A request waiting for its correlated response.
struct PendingRequest {
    kind: RequestKind,
    tx: oneshot::Sender<Result<Value, RequestError>>,
}

/// Write half of the live socket, plus a signal the reader loop watches
/// for send failures.
struct Link {
    sender: WsSender,
    broken: Arc<Notify>,
}

#[derive(Clone, Copy)]
enum HandlerKind {
    Event,
    Reconnect,
}

struct Shared {
    config: TransportConfig,
    target: ConnectTarget,
    state: watch::Sender<ConnectionState>,
    pending: Mutex<HashMap<String, PendingRequest>>,
    subscribers: Mutex<Vec<(u64, EventHandler)>>,
    reconnect_handlers: Mutex<Vec<(u64, ReconnectHandler)>>,
    next_handler_id: AtomicU64,
    link: tokio::sync::Mutex<Option<Link>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    backoff: Mutex<Backoff>,
    connected_once: AtomicBool,
}

/// Handle to the persistent connection. Cheap to clone; all clones share
/// the same socket, pending map and subscriber lists.
#[derive(Clone)]
pub struct TransportManager {
    shared: Arc<Shared>,
}

/// Registration returned by [`TransportManager::subscribe`] and
/// [`TransportManager::on_reconnect`].
///
/// Dropping it keeps the handler registered; call
/// [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    id: u64,
    kind: HandlerKind,
    shared: Weak<Shared>,
}

impl Subscription {
    /// Remove the handler. No effect if the transport is gone.
    pub fn unsubscribe(self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        match self.kind {
            HandlerKind::Event => shared.subscribers.lock().retain(|(id, _)| *id != self.id),
            HandlerKind::Reconnect => shared
                .reconnect_handlers
                .lock()
                .retain(|(id, _)| *id != self.id),
        }
    }
}

impl TransportManager {
    /// Create a manager in the `Disconnected` state. Nothing is opened
    /// until [`TransportManager::connect`] is called.
    #[must_use]
    pub fn new(target: ConnectTarget, config: TransportConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let backoff = Backoff::new(config.reconnect.clone());
        Self {
            shared: Arc::new(Shared {
                config,
                target,
                state,
                pending: Mutex::new(HashMap::new()),
                subscribers: Mutex::new(Vec::new()),
                reconnect_handlers: Mutex::new(Vec::new()),
                next_handler_id: AtomicU64::new(0),
                link: tokio::sync::Mutex::new(None),
                supervisor: Mutex::new(None),
                backoff: Mutex::new(backoff),
                connected_once: AtomicBool::new(false),
            }),
        }
    }

    /// Start connecting. Idempotent: a no-op while a connection is already
    /// open or being attempted.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(&self) {
        let mut supervisor = self.shared.supervisor.lock();
        if supervisor.as_ref().is_some_and(|h| !h.is_finished()) {
            tracing::debug!("connect ignored, supervisor already running");
            return;
        }
        self.shared.set_state(ConnectionState::Connecting);
        *supervisor = Some(tokio::spawn(supervise(Arc::clone(&self.shared))));
    }

    /// Close the connection intentionally and stop reconnecting.
    ///
    /// Every outstanding request is rejected with
    /// [`RequestError::Disconnecting`].
    pub async fn disconnect(&self) {
        let handle = self.shared.supervisor.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }

        if let Some(mut link) = self.shared.link.lock().await.take() {
            let _ = link.sender.send(Message::Close(None)).await;
            let _ = link.sender.close().await;
        }

        self.shared.reject_all(|| RequestError::Disconnecting);
        self.shared.backoff.lock().reset();
        self.shared.connected_once.store(false, Ordering::SeqCst);
        self.shared.set_state(ConnectionState::Disconnected);
        tracing::info!("transport disconnected by client");
    }

    /// Send a request and wait for its correlated response payload.
    ///
    /// # Errors
    ///
    /// - [`RequestError::NotConnected`] if the socket is not open.
    /// - [`RequestError::Timeout`] if no response arrives in time.
    /// - [`RequestError::ConnectionLost`] / [`RequestError::Disconnecting`]
    ///   if the connection goes away first.
    /// - [`RequestError::Server`] if the response carries an error object.
    /// - [`RequestError::Io`] if the frame cannot be written.
    pub async fn send(&self, kind: RequestKind, payload: Value) -> Result<Value, RequestError> {
        if self.state() != ConnectionState::Connected {
            return Err(RequestError::NotConnected);
        }

        let correlation_id = Uuid::now_v7().to_string();
        let frame = codec::encode(&Envelope::request(kind.as_str(), payload, &correlation_id))?;

        let (tx, mut rx) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .insert(correlation_id.clone(), PendingRequest { kind, tx });

        if let Err(e) = self.shared.transmit(Message::Text(frame.into())).await {
            self.shared.pending.lock().remove(&correlation_id);
            return Err(e);
        }
        tracing::debug!(request = %kind, correlation_id = %correlation_id, "request sent");

        let timeout = self.shared.config.request_timeout;
        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RequestError::ConnectionLost),
            Err(_) => {
                if self.shared.pending.lock().remove(&correlation_id).is_some() {
                    tracing::warn!(request = %kind, correlation_id = %correlation_id, "request timed out");
                    return Err(RequestError::Timeout(timeout));
                }
                // Settled concurrently with the deadline.
                rx.try_recv().unwrap_or(Err(RequestError::ConnectionLost))
            }
        }
    }

    /// Register a handler for every inbound broadcast envelope.
    ///
    /// Handlers run on the reader task. A panicking handler is logged and
    /// does not affect the others.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let id = self.shared.next_handler_id.fetch_add(1, Ordering::Relaxed);
        self.shared.subscribers.lock().push((id, Arc::new(handler)));
        Subscription {
            id,
            kind: HandlerKind::Event,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Register a handler fired once per successful reconnection (never on
    /// the first connection).
    pub fn on_reconnect<F>(&self, handler: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.shared.next_handler_id.fetch_add(1, Ordering::Relaxed);
        self.shared
            .reconnect_handlers
            .lock()
            .push((id, Arc::new(handler)));
        Subscription {
            id,
            kind: HandlerKind::Reconnect,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Observe connection state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Wait until the state becomes `Connected`, up to `timeout`.
    ///
    /// Returns `false` on timeout.
    pub async fn wait_connected(&self, timeout: std::time::Duration) -> bool {
        let mut rx = self.watch_state();
        tokio::time::timeout(
            timeout,
            rx.wait_for(|s| *s == ConnectionState::Connected),
        )
        .await
        .is_ok_and(|r| r.is_ok())
    }
}

impl RequestChannel for TransportManager {
    async fn request(&self, kind: RequestKind, payload: Value) -> Result<Value, RequestError> {
        self.send(kind, payload).await
    }

    fn is_available(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn channel_type(&self) -> ChannelType {
        ChannelType::Socket
    }
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "connection state changed");
        }
    }

    async fn transmit(&self, message: Message) -> Result<(), RequestError> {
        let mut guard = self.link.lock().await;
        let Some(link) = guard.as_mut() else {
            return Err(RequestError::NotConnected);
        };
        if let Err(e) = link.sender.send(message).await {
            tracing::warn!(err = %e, "socket send failed");
            link.broken.notify_one();
            return Err(RequestError::Io(e.to_string()));
        }
        Ok(())
    }

    fn reject_all(&self, reason: impl Fn() -> RequestError) {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), reason = %reason(), "rejecting pending requests");
        }
        for (_, pending) in drained {
            let _ = pending.tx.send(Err(reason()));
        }
    }

    /// Route one inbound text frame.
    fn handle_frame(&self, text: &str) {
        let envelope = match codec::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(err = %e, "malformed frame, skipping");
                return;
            }
        };

        if let Some(correlation_id) = envelope.correlation_id.as_deref() {
            let matched = {
                let mut pending = self.pending.lock();
                let is_match = pending
                    .get(correlation_id)
                    .is_some_and(|p| envelope.kind == p.kind.response_type());
                if is_match {
                    pending.remove(correlation_id)
                } else {
                    None
                }
            };
            if let Some(pending) = matched {
                let result = match envelope.error {
                    Some(err) => Err(RequestError::from(err)),
                    None => Ok(envelope.payload),
                };
                let _ = pending.tx.send(result);
                return;
            }
            if envelope.is_response() {
                tracing::debug!(
                    kind = %envelope.kind,
                    correlation_id,
                    "dropping response with no pending request"
                );
                return;
            }
        }

        self.broadcast(&envelope);
    }

    fn broadcast(&self, envelope: &Envelope) {
        let handlers: Vec<EventHandler> = self
            .subscribers
            .lock()
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in handlers {
            if std::panic::catch_unwind(AssertUnwindSafe(|| handler(envelope))).is_err() {
                tracing::error!(kind = %envelope.kind, "event subscriber panicked");
            }
        }
    }

    fn notify_reconnect(&self) {
        let handlers: Vec<ReconnectHandler> = self
            .reconnect_handlers
            .lock()
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in handlers {
            if std::panic::catch_unwind(AssertUnwindSafe(|| handler())).is_err() {
                tracing::error!("reconnect handler panicked");
            }
        }
    }
}

/// Connection supervisor: connect, read until the socket dies, back off,
/// repeat. Runs until aborted by `disconnect`.
async fn supervise(shared: Arc<Shared>) {
    loop {
        shared.set_state(ConnectionState::Connecting);
        match open_socket(&shared).await {
            Ok(stream) => {
                let (sender, reader) = stream.split();
                let broken = Arc::new(Notify::new());
                *shared.link.lock().await = Some(Link {
                    sender,
                    broken: Arc::clone(&broken),
                });
                shared.backoff.lock().reset();
                shared.set_state(ConnectionState::Connected);

                let reconnected = shared.connected_once.swap(true, Ordering::SeqCst);
                tracing::info!(
                    url = %shared.target.base_url(),
                    reconnected,
                    "socket connected"
                );
                if reconnected {
                    shared.notify_reconnect();
                }

                let reason = reader_loop(&shared, reader, &broken).await;
                shared.link.lock().await.take();
                tracing::warn!(reason, "socket connection lost");
                shared.reject_all(|| RequestError::ConnectionLost);
            }
            Err(reason) => {
                tracing::warn!(reason = %reason, "socket connect failed");
            }
        }

        shared.set_state(ConnectionState::Reconnecting);
        let (delay, attempt) = {
            let mut backoff = shared.backoff.lock();
            let delay = backoff.next_delay();
            (delay, backoff.attempt())
        };
        tracing::info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt,
            "reconnecting after backoff"
        );
        tokio::time::sleep(delay).await;
    }
}

async fn open_socket(
    shared: &Shared,
) -> Result<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>, String> {
    let request = shared
        .target
        .handshake_request()
        .map_err(|e| e.to_string())?;
    let (stream, _response) =
        tokio::time::timeout(shared.config.connect_timeout, connect_async(request))
            .await
            .map_err(|_| "connect timed out".to_string())?
            .map_err(|e| e.to_string())?;
    Ok(stream)
}

/// Read frames until the socket closes, errors, goes silent past the
/// heartbeat timeout, or a send fails. Returns the reason.
async fn reader_loop(shared: &Shared, mut reader: WsReader, broken: &Notify) -> &'static str {
    let heartbeat_timeout = shared.config.heartbeat_timeout;
    let mut ping = tokio::time::interval(shared.config.heartbeat_interval);
    ping.tick().await;
    let mut last_frame = Instant::now();

    loop {
        tokio::select! {
            frame = reader.next() => {
                last_frame = Instant::now();
                match frame {
                    Some(Ok(Message::Text(text))) => shared.handle_frame(text.as_str()),
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => shared.handle_frame(text),
                        Err(_) => tracing::warn!(len = data.len(), "non-UTF-8 binary frame, skipping"),
                    },
                    Some(Ok(Message::Close(_))) => return "closed by server",
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                    Some(Err(e)) => {
                        tracing::warn!(err = %e, "socket read error");
                        return "read error";
                    }
                    None => return "stream ended",
                }
            }
            _ = ping.tick() => {
                if shared.transmit(Message::Ping(Vec::new().into())).await.is_err() {
                    return "heartbeat send failed";
                }
            }
            () = tokio::time::sleep_until(last_frame + heartbeat_timeout) => {
                return "heartbeat timeout";
            }
            () = broken.notified() => return "send failed",
        }
    }
}
