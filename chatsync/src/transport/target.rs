//! Where to connect and how to authenticate.
//!
//! The session itself (user identity, token, cookie) is supplied by a
//! [`SessionStore`] so the host application can rotate credentials between
//! reconnection attempts.

use std::sync::Arc;

use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use url::Url;

use chatsync_proto::message::UserId;

/// Errors raised while building connection targets.
#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    /// The base URL could not be parsed or joined.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The base URL uses a scheme that cannot be mapped to WebSocket.
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// No session is available.
    #[error("no session available")]
    NoSession,

    /// The credential cannot be carried in an HTTP header.
    #[error("invalid credential header: {0}")]
    InvalidHeader(String),
}

/// Credentials of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// The signed-in user.
    pub user_id: UserId,
    /// Bearer token, used in [`AuthMode::Token`].
    pub token: Option<String>,
    /// Raw `Cookie` header value, used in [`AuthMode::Cookie`].
    pub cookie: Option<String>,
}

/// Source of the current session.
pub trait SessionStore: Send + Sync {
    /// Current credentials, or `None` when signed out.
    fn credentials(&self) -> Option<Credentials>;
}

/// A session fixed at construction time.
#[derive(Debug, Clone)]
pub struct StaticSession {
    credentials: Credentials,
}

impl StaticSession {
    /// Wrap fixed credentials.
    #[must_use]
    pub const fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    /// Session authenticated by bearer token.
    pub fn with_token(user_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self::new(Credentials {
            user_id: UserId::new(user_id),
            token: Some(token.into()),
            cookie: None,
        })
    }
}

impl SessionStore for StaticSession {
    fn credentials(&self) -> Option<Credentials> {
        Some(self.credentials.clone())
    }
}

/// How credentials travel on the WebSocket handshake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthMode {
    /// Send the session cookie as a `Cookie` header.
    Cookie,
    /// Append the token as a `token` query parameter.
    #[default]
    Token,
}

/// Backend location plus session, shared by the socket and REST channels.
#[derive(Clone)]
pub struct ConnectTarget {
    base_url: Url,
    ws_path: String,
    auth: AuthMode,
    session: Arc<dyn SessionStore>,
}

impl std::fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectTarget")
            .field("base_url", &self.base_url.as_str())
            .field("ws_path", &self.ws_path)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

impl ConnectTarget {
    /// Build a target from an `http(s)://` or `ws(s)://` base URL.
    ///
    /// # Errors
    ///
    /// Returns [`TargetError::InvalidUrl`] if `base_url` does not parse.
    pub fn new(
        base_url: &str,
        ws_path: impl Into<String>,
        auth: AuthMode,
        session: Arc<dyn SessionStore>,
    ) -> Result<Self, TargetError> {
        Ok(Self {
            base_url: Url::parse(base_url)?,
            ws_path: ws_path.into(),
            auth,
            session,
        })
    }

    /// The base URL as configured.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The handshake authentication mode.
    #[must_use]
    pub const fn auth_mode(&self) -> AuthMode {
        self.auth
    }

    /// Current credentials.
    ///
    /// # Errors
    ///
    /// Returns [`TargetError::NoSession`] when the session store is empty.
    pub fn credentials(&self) -> Result<Credentials, TargetError> {
        self.session.credentials().ok_or(TargetError::NoSession)
    }

    /// WebSocket endpoint: the base URL with its scheme mapped
    /// (`http`→`ws`, `https`→`wss`) and the socket path applied. In token
    /// mode the token is appended as a query parameter.
    ///
    /// # Errors
    ///
    /// Returns [`TargetError::UnsupportedScheme`] for non-HTTP(S)/WS(S) URLs
    /// and [`TargetError::NoSession`] when there is no session.
    pub fn ws_url(&self) -> Result<Url, TargetError> {
        let credentials = self.credentials()?;
        let mut url = self.base_url.clone();
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(TargetError::UnsupportedScheme(other.to_string())),
        };
        url.set_scheme(scheme)
            .map_err(|()| TargetError::UnsupportedScheme(scheme.to_string()))?;
        url.set_path(&self.ws_path);
        url.set_query(None);
        if self.auth == AuthMode::Token
            && let Some(token) = &credentials.token
        {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url)
    }

    /// HTTP endpoint for a REST route such as `/api/messages`.
    ///
    /// # Errors
    ///
    /// Returns [`TargetError::InvalidUrl`] if the route does not join.
    pub fn rest_url(&self, route: &str) -> Result<Url, TargetError> {
        let mut url = self.base_url.clone();
        match url.scheme() {
            "ws" => url
                .set_scheme("http")
                .map_err(|()| TargetError::UnsupportedScheme("ws".into()))?,
            "wss" => url
                .set_scheme("https")
                .map_err(|()| TargetError::UnsupportedScheme("wss".into()))?,
            _ => {}
        }
        Ok(url.join(route)?)
    }

    /// WebSocket handshake request, carrying the session cookie in cookie mode.
    ///
    /// # Errors
    ///
    /// See [`ConnectTarget::ws_url`]; also [`TargetError::InvalidHeader`] if
    /// the cookie contains characters not allowed in a header.
    pub fn handshake_request(&self) -> Result<Request, TargetError> {
        let url = self.ws_url()?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TargetError::InvalidHeader(e.to_string()))?;
        if self.auth == AuthMode::Cookie
            && let Some(cookie) = self.credentials()?.cookie
        {
            let value = HeaderValue::from_str(&cookie)
                .map_err(|e| TargetError::InvalidHeader(e.to_string()))?;
            request.headers_mut().insert(COOKIE, value);
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SignedOut;

    impl SessionStore for SignedOut {
        fn credentials(&self) -> Option<Credentials> {
            None
        }
    }

    fn token_target(base: &str) -> ConnectTarget {
        ConnectTarget::new(
            base,
            "/ws",
            AuthMode::Token,
            Arc::new(StaticSession::with_token("alice", "tok-1")),
        )
        .unwrap()
    }

    #[test]
    fn http_maps_to_ws_with_token_query() {
        let url = token_target("http://localhost:8080").ws_url().unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8080/ws?token=tok-1");
    }

    #[test]
    fn https_maps_to_wss() {
        let url = token_target("https://chat.example.com").ws_url().unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/ws");
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        let result = token_target("ftp://example.com").ws_url();
        assert!(matches!(result, Err(TargetError::UnsupportedScheme(_))));
    }

    #[test]
    fn cookie_mode_sets_header_and_no_query() {
        let session = StaticSession::new(Credentials {
            user_id: UserId::new("alice"),
            token: Some("unused".into()),
            cookie: Some("sid=abc".into()),
        });
        let target =
            ConnectTarget::new("http://localhost:1", "/ws", AuthMode::Cookie, Arc::new(session))
                .unwrap();
        let request = target.handshake_request().unwrap();
        assert_eq!(request.headers()[COOKIE], "sid=abc");
        assert!(request.uri().query().is_none());
    }

    #[test]
    fn rest_url_joins_route() {
        let url = token_target("ws://localhost:8080")
            .rest_url("/api/messages")
            .unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/api/messages");
    }

    #[test]
    fn signed_out_session_fails() {
        let target =
            ConnectTarget::new("http://localhost:1", "/ws", AuthMode::Token, Arc::new(SignedOut))
                .unwrap();
        assert!(matches!(target.ws_url(), Err(TargetError::NoSession)));
    }
}
