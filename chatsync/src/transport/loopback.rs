//! Scripted in-process request channel for testing.
//!
//! [`LoopbackChannel`] answers every request through a responder closure
//! and records what it was asked, so higher layers can be exercised
//! without a socket or an HTTP server.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::{Value, json};

use chatsync_proto::request::RequestKind;

use super::{ChannelType, RequestChannel, RequestError};

/// Closure producing the response for one request.
pub type Responder = Arc<dyn Fn(RequestKind, &Value) -> Result<Value, RequestError> + Send + Sync>;

/// In-process [`RequestChannel`] driven by a [`Responder`].
pub struct LoopbackChannel {
    responder: Responder,
    calls: Mutex<Vec<(RequestKind, Value)>>,
    available: AtomicBool,
}

impl LoopbackChannel {
    /// Create a channel answering with `responder`.
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(RequestKind, &Value) -> Result<Value, RequestError> + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            calls: Mutex::new(Vec::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Create a channel that answers `{"ok": true}` to everything.
    #[must_use]
    pub fn always_ok() -> Self {
        Self::new(|_, _| Ok(json!({"ok": true})))
    }

    /// Simulate the channel going up or down. While down, every request
    /// fails with [`RequestError::NotConnected`] and is not recorded.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Every request received so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<(RequestKind, Value)> {
        self.calls.lock().clone()
    }

    /// Payloads of the requests of one kind, in order.
    #[must_use]
    pub fn calls_of(&self, kind: RequestKind) -> Vec<Value> {
        self.calls
            .lock()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, v)| v.clone())
            .collect()
    }
}

impl RequestChannel for LoopbackChannel {
    async fn request(&self, kind: RequestKind, payload: Value) -> Result<Value, RequestError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(RequestError::NotConnected);
        }
        let result = (self.responder)(kind, &payload);
        self.calls.lock().push((kind, payload));
        result
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn channel_type(&self) -> ChannelType {
        ChannelType::Loopback
    }
}
