//! REST fallback channel.
//!
//! Carries the same request kinds as the socket, one HTTP route per kind,
//! with the same JSON bodies. Read-only kinds (`fetch_sync_actions`,
//! `list_chats`, `fetch_messages`) map to `GET` routes, with the history
//! page parameters moved into the path and query string.

use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use chatsync_proto::codec::WireError;
use chatsync_proto::request::{FetchMessagesRequest, RequestKind};

use super::target::{AuthMode, ConnectTarget};
use super::{ChannelType, RequestChannel, RequestError};

/// HTTP method and path serving `kind`.
#[must_use]
pub fn route(kind: RequestKind) -> (Method, &'static str) {
    match kind {
        RequestKind::SendMessage => (Method::POST, "/api/messages"),
        RequestKind::AckDelivery => (Method::POST, "/api/messages/delivered"),
        RequestKind::MarkRead => (Method::POST, "/api/chats/read"),
        RequestKind::Unsend => (Method::POST, "/api/messages/unsend"),
        RequestKind::DeleteForMe => (Method::POST, "/api/messages/delete-for-me"),
        RequestKind::FetchSyncActions => (Method::GET, "/api/sync/actions"),
        RequestKind::AckSyncActions => (Method::POST, "/api/sync/ack"),
        RequestKind::ListChats => (Method::GET, "/api/chats"),
        RequestKind::FetchMessages => (Method::GET, "/api/chats/{chat_id}/messages"),
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: WireError,
}

/// REST client over `reqwest`.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: Client,
    target: ConnectTarget,
    timeout: Duration,
}

impl RestClient {
    /// Create a client for `target` with a per-request `timeout`.
    #[must_use]
    pub fn new(target: ConnectTarget, timeout: Duration) -> Self {
        Self {
            http: Client::new(),
            target,
            timeout,
        }
    }

    /// Issue one HTTP call and return its JSON body.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Timeout`] / [`RequestError::Io`] when the server
    ///   cannot be reached.
    /// - [`RequestError::Server`] when a non-success response carries an
    ///   error object; [`RequestError::Http`] when it does not.
    /// - [`RequestError::Decode`] when a success body is not JSON.
    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        query: &[(&str, String)],
    ) -> Result<Value, RequestError> {
        let url = self
            .target
            .rest_url(path)
            .map_err(|e| RequestError::Io(e.to_string()))?;
        let credentials = self
            .target
            .credentials()
            .map_err(|e| RequestError::Io(e.to_string()))?;

        let mut builder = self
            .http
            .request(method.clone(), url)
            .timeout(self.timeout)
            .query(query);
        builder = match (self.target.auth_mode(), &credentials.cookie, &credentials.token) {
            (AuthMode::Cookie, Some(cookie), _) => builder.header(reqwest::header::COOKIE, cookie),
            (_, _, Some(token)) => builder.bearer_auth(token),
            _ => builder,
        };
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| self.map_send_error(&e))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::warn!(%method, path, status = status.as_u16(), "REST request failed");
            return Err(error_from_body(status, &text));
        }

        let text = response
            .text()
            .await
            .map_err(|e| RequestError::Io(e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(&text).map_err(|e| RequestError::Decode(e.to_string()))
    }

    fn map_send_error(&self, err: &reqwest::Error) -> RequestError {
        if err.is_timeout() {
            RequestError::Timeout(self.timeout)
        } else {
            tracing::debug!(err = %err, "REST transport error");
            RequestError::Io(err.to_string())
        }
    }
}

fn error_from_body(status: StatusCode, body: &str) -> RequestError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody { error }) => error.into(),
        Err(_) => RequestError::Http(status.as_u16()),
    }
}

impl RequestChannel for RestClient {
    async fn request(&self, kind: RequestKind, payload: Value) -> Result<Value, RequestError> {
        let (method, path) = route(kind);
        match kind {
            RequestKind::FetchMessages => {
                let page: FetchMessagesRequest = serde_json::from_value(payload)
                    .map_err(|e| RequestError::Decode(e.to_string()))?;
                let path = path.replace("{chat_id}", page.chat_id.as_str());
                let query = [
                    ("offset", page.offset.to_string()),
                    ("limit", page.limit.to_string()),
                ];
                self.execute(method, &path, None, &query).await
            }
            _ if method == Method::GET => self.execute(method, path, None, &[]).await,
            _ => self.execute(method, path, Some(&payload), &[]).await,
        }
    }

    fn is_available(&self) -> bool {
        self.target.credentials().is_ok()
    }

    fn channel_type(&self) -> ChannelType {
        ChannelType::Rest
    }
}
