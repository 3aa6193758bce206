//! Socket-first request channel with REST fallback.
//!
//! [`HybridChannel`] wraps a preferred and a fallback [`RequestChannel`].
//! A request goes to the preferred channel when it reports itself
//! available; if that fails with a transient error (not connected, timed
//! out, connection lost, I/O) the same request is replayed on the
//! fallback. Errors that describe the request itself, such as a server
//! rejection, are returned as-is.

use serde_json::Value;

use chatsync_proto::request::RequestKind;

use super::{ChannelType, RequestChannel, RequestError};

/// Channel that tries a preferred channel and falls back to a secondary.
///
/// # Type Parameters
///
/// - `P`: The preferred channel (e.g., the WebSocket transport).
/// - `F`: The fallback channel (e.g., REST).
pub struct HybridChannel<P: RequestChannel, F: RequestChannel> {
    preferred: P,
    fallback: F,
}

impl<P: RequestChannel, F: RequestChannel> HybridChannel<P, F> {
    /// Create a new hybrid channel with the given preferred and fallback.
    #[must_use]
    pub const fn new(preferred: P, fallback: F) -> Self {
        Self {
            preferred,
            fallback,
        }
    }

    /// Get a reference to the preferred channel.
    pub const fn preferred(&self) -> &P {
        &self.preferred
    }

    /// Get a reference to the fallback channel.
    pub const fn fallback(&self) -> &F {
        &self.fallback
    }
}

impl<P: RequestChannel, F: RequestChannel> RequestChannel for HybridChannel<P, F> {
    async fn request(&self, kind: RequestKind, payload: Value) -> Result<Value, RequestError> {
        if self.preferred.is_available() {
            match self.preferred.request(kind, payload.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() => {
                    tracing::warn!(
                        request = %kind,
                        err = %e,
                        channel = %self.preferred.channel_type(),
                        "preferred channel failed, falling back to {}",
                        self.fallback.channel_type()
                    );
                }
                Err(e) => return Err(e),
            }
        } else {
            tracing::debug!(request = %kind, "preferred channel unavailable, using fallback");
        }
        self.fallback.request(kind, payload).await
    }

    fn is_available(&self) -> bool {
        self.preferred.is_available() || self.fallback.is_available()
    }

    fn channel_type(&self) -> ChannelType {
        ChannelType::Hybrid
    }
}
