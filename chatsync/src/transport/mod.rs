//! Request channels and the connection they run over.
//!
//! Every request-style action goes through a [`RequestChannel`]. Concrete
//! implementations:
//! - [`manager::TransportManager`]: the persistent WebSocket connection
//! - [`rest::RestClient`]: the REST fallback
//! - [`hybrid::HybridChannel`]: prefers the socket, falls back to REST
//! - [`loopback::LoopbackChannel`]: scripted in-process channel for tests

pub mod backoff;
pub mod hybrid;
pub mod loopback;
pub mod manager;
pub mod rest;
pub mod target;

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use chatsync_proto::codec::{CodecError, WireError};
use chatsync_proto::request::RequestKind;

/// Lifecycle of the logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and none being attempted.
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// The socket is open and requests can be sent.
    Connected,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Describes which kind of channel carried a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    /// Persistent WebSocket connection.
    Socket,
    /// REST fallback.
    Rest,
    /// Socket with REST fallback.
    Hybrid,
    /// In-process loopback for testing.
    Loopback,
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Socket => write!(f, "Socket"),
            Self::Rest => write!(f, "REST"),
            Self::Hybrid => write!(f, "Hybrid"),
            Self::Loopback => write!(f, "Loopback"),
        }
    }
}

/// Errors a request can fail with.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// The socket is not connected.
    #[error("not connected")]
    NotConnected,

    /// No response arrived within the deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The connection dropped before a response arrived.
    #[error("connection lost before a response arrived")]
    ConnectionLost,

    /// The client is shutting the connection down.
    #[error("client disconnecting")]
    Disconnecting,

    /// Writing to the socket or reaching the REST endpoint failed.
    #[error("transport I/O error: {0}")]
    Io(String),

    /// The server answered with an error object.
    #[error("server error {code}: {message}")]
    Server {
        /// Machine-readable error code.
        code: String,
        /// Human-readable description.
        message: String,
    },

    /// The REST endpoint answered with a non-success status and no error body.
    #[error("HTTP status {0}")]
    Http(u16),

    /// The request could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The response body did not match the expected schema.
    #[error("malformed response: {0}")]
    Decode(String),
}

impl RequestError {
    /// Whether the failure says nothing about the request itself and the
    /// same request may be retried on another channel.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::Timeout(_) | Self::ConnectionLost | Self::Io(_)
        )
    }
}

impl From<WireError> for RequestError {
    fn from(err: WireError) -> Self {
        Self::Server {
            code: err.code,
            message: err.message,
        }
    }
}

/// Async channel carrying request/response exchanges with the backend.
///
/// Implementations share one contract: the same [`RequestKind`] with the
/// same JSON payload produces the same JSON response regardless of the
/// path taken, so callers never need to know which channel served them.
pub trait RequestChannel: Send + Sync {
    /// Issue `kind` with `payload` and wait for its response payload.
    fn request(
        &self,
        kind: RequestKind,
        payload: Value,
    ) -> impl std::future::Future<Output = Result<Value, RequestError>> + Send;

    /// Whether a request issued now has a chance of being carried.
    fn is_available(&self) -> bool;

    /// Return the type of this channel.
    fn channel_type(&self) -> ChannelType;
}

/// Typed wrapper over [`RequestChannel::request`].
///
/// # Errors
///
/// Returns [`RequestError::Decode`] if the request cannot be serialized or
/// the response does not deserialize into `Resp`, plus anything the
/// channel itself returns.
pub async fn call<C, Req, Resp>(
    channel: &C,
    kind: RequestKind,
    request: &Req,
) -> Result<Resp, RequestError>
where
    C: RequestChannel,
    Req: Serialize + Sync,
    Resp: DeserializeOwned,
{
    let payload = serde_json::to_value(request).map_err(|e| RequestError::Decode(e.to_string()))?;
    let response = channel.request(kind, payload).await?;
    serde_json::from_value(response).map_err(|e| RequestError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(RequestError::NotConnected.is_transient());
        assert!(RequestError::Timeout(Duration::from_secs(10)).is_transient());
        assert!(RequestError::ConnectionLost.is_transient());
        assert!(RequestError::Io("broken pipe".into()).is_transient());
    }

    #[test]
    fn server_errors_are_not_retryable() {
        let err = RequestError::Server {
            code: "forbidden".into(),
            message: "nope".into(),
        };
        assert!(!err.is_transient());
        assert!(!RequestError::Disconnecting.is_transient());
        assert!(!RequestError::Http(500).is_transient());
    }

    #[test]
    fn wire_error_maps_to_server_error() {
        let err: RequestError = WireError {
            code: "not_found".into(),
            message: "chat not found".into(),
        }
        .into();
        assert_eq!(err.to_string(), "server error not_found: chat not found");
    }
}
