//! Shared harness for the client integration tests: an in-process backend
//! with two seeded users and a helper to build clients against it.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::mpsc;

use chatsync::chat::{BackgroundError, ChatClient, DefaultChannel};
use chatsync::config::{ReconnectConfig, SyncConfig, TransportConfig};
use chatsync::transport::hybrid::HybridChannel;
use chatsync::transport::manager::TransportManager;
use chatsync::transport::rest::RestClient;
use chatsync::transport::target::{AuthMode, ConnectTarget, SessionStore, StaticSession};
use chatsync_backend::server::{self, ServerState};
use chatsync_proto::message::{ChatId, UserId};
use chatsync_proto::request::RequestKind;

pub const ALICE_TOKEN: &str = "alice-token";
pub const BOB_TOKEN: &str = "bob-token";

pub struct Backend {
    pub addr: SocketAddr,
    pub state: Arc<ServerState>,
    pub chat: ChatId,
    _handle: tokio::task::JoinHandle<()>,
}

impl Backend {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Sends a message on behalf of `from`, bypassing any client.
    pub async fn send_as(&self, from: &str, to: &str, text: &str, temp_id: &str) -> serde_json::Value {
        server::dispatch(
            &self.state,
            &UserId::new(from),
            RequestKind::SendMessage,
            json!({
                "chat_id": self.chat,
                "recipient_id": to,
                "content": text,
                "type": "text",
                "temp_id": temp_id,
            }),
        )
        .await
        .unwrap()
    }
}

pub async fn start_backend() -> Backend {
    let state = Arc::new(ServerState::new());
    state.store.add_user(&UserId::new("alice"), ALICE_TOKEN).await;
    state.store.add_user(&UserId::new("bob"), BOB_TOKEN).await;
    let chat = state
        .store
        .create_chat(&UserId::new("alice"), &UserId::new("bob"))
        .await;
    let (addr, handle) = server::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    Backend {
        addr,
        state,
        chat,
        _handle: handle,
    }
}

pub fn transport_config(base_delay: Duration) -> TransportConfig {
    TransportConfig {
        connect_timeout: Duration::from_secs(2),
        request_timeout: Duration::from_secs(2),
        heartbeat_interval: Duration::from_secs(25),
        heartbeat_timeout: Duration::from_secs(60),
        reconnect: ReconnectConfig {
            base_delay,
            max_delay: base_delay * 4,
            max_jitter: Duration::from_millis(10),
        },
    }
}

pub fn sync_config() -> SyncConfig {
    SyncConfig {
        horizon_tolerance: Duration::ZERO,
        mark_read_debounce: Duration::from_millis(20),
        ..SyncConfig::default()
    }
}

pub type Client = ChatClient<DefaultChannel>;

pub fn client_with(
    base_url: &str,
    user: &str,
    auth: AuthMode,
    session: Arc<dyn SessionStore>,
    reconnect_delay: Duration,
) -> (Client, mpsc::Receiver<BackgroundError>) {
    let target = ConnectTarget::new(base_url, "/ws", auth, session).unwrap();
    let transport = TransportManager::new(target.clone(), transport_config(reconnect_delay));
    let rest = RestClient::new(target, Duration::from_secs(2));
    let channel = HybridChannel::new(transport.clone(), rest);
    ChatClient::new(UserId::new(user), sync_config(), transport, channel)
}

pub fn client(base_url: &str, user: &str, token: &str) -> (Client, mpsc::Receiver<BackgroundError>) {
    client_with(
        base_url,
        user,
        AuthMode::Token,
        Arc::new(StaticSession::with_token(user, token)),
        Duration::from_millis(50),
    )
}

/// Connects `client` and waits for the socket to open.
pub async fn connected(client: &Client) {
    client.connect();
    assert!(
        client
            .transport()
            .wait_connected(Duration::from_secs(3))
            .await,
        "client did not connect"
    );
}

/// Polls `check` every 10ms until it holds or `timeout` elapses.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
