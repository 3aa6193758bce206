// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for request/response correlation over a live socket.
//!
//! A scripted WebSocket server (raw `tokio-tungstenite`) hands every
//! inbound envelope to the test and writes whatever frames the test
//! pushes, so responses can be delayed, reordered, dropped or sent late.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use chatsync::config::{ReconnectConfig, TransportConfig};
use chatsync::transport::manager::TransportManager;
use chatsync::transport::target::{AuthMode, ConnectTarget, StaticSession};
use chatsync::transport::{ConnectionState, RequestError};
use chatsync_proto::codec::{self, Envelope, WireError};
use chatsync_proto::request::RequestKind;

struct ScriptedServer {
    requests: mpsc::UnboundedReceiver<Envelope>,
    frames: mpsc::UnboundedSender<String>,
}

impl ScriptedServer {
    async fn next_request(&mut self) -> Envelope {
        tokio::time::timeout(Duration::from_secs(3), self.requests.recv())
            .await
            .expect("no request arrived")
            .expect("server task ended")
    }

    fn push(&self, envelope: &Envelope) {
        self.frames.send(codec::encode(envelope).unwrap()).unwrap();
    }

    fn reply(&self, request: &Envelope, payload: Value) {
        self.push(&Envelope::response_to(request, payload));
    }
}

/// Accepts one socket and bridges it to the returned [`ScriptedServer`].
async fn scripted_server() -> (ScriptedServer, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (request_tx, requests) = mpsc::unbounded_channel();
    let (frames, mut frame_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let (mut sink, mut source) = ws.split();
        loop {
            tokio::select! {
                frame = source.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(envelope) = codec::decode(text.as_str()) {
                            let _ = request_tx.send(envelope);
                        }
                    }
                    Some(Ok(_)) => {}
                    _ => break,
                },
                out = frame_rx.recv() => match out {
                    Some(text) => {
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    });

    (ScriptedServer { requests, frames }, format!("http://{addr}"))
}

fn manager(base_url: &str, request_timeout: Duration) -> TransportManager {
    let target = ConnectTarget::new(
        base_url,
        "/ws",
        AuthMode::Token,
        Arc::new(StaticSession::with_token("alice", "alice-token")),
    )
    .unwrap();
    TransportManager::new(
        target,
        TransportConfig {
            connect_timeout: Duration::from_secs(2),
            request_timeout,
            heartbeat_interval: Duration::from_secs(25),
            heartbeat_timeout: Duration::from_secs(60),
            reconnect: ReconnectConfig {
                base_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(5),
                max_jitter: Duration::ZERO,
            },
        },
    )
}

async fn connected_pair(request_timeout: Duration) -> (TransportManager, ScriptedServer) {
    let (server, url) = scripted_server().await;
    let manager = manager(&url, request_timeout);
    manager.connect();
    assert!(manager.wait_connected(Duration::from_secs(3)).await);
    (manager, server)
}

#[tokio::test]
async fn response_resolves_matching_request() {
    let (manager, mut server) = connected_pair(Duration::from_secs(2)).await;

    let call = tokio::spawn({
        let manager = manager.clone();
        async move { manager.send(RequestKind::ListChats, json!({})).await }
    });

    let request = server.next_request().await;
    assert_eq!(request.kind, "list_chats");
    assert!(request.correlation_id.is_some());
    server.reply(&request, json!({ "chats": [] }));

    let response = call.await.unwrap().unwrap();
    assert_eq!(response, json!({ "chats": [] }));
    assert_eq!(manager.pending_requests(), 0);
}

#[tokio::test]
async fn responses_out_of_order_reach_their_callers() {
    let (manager, mut server) = connected_pair(Duration::from_secs(2)).await;

    let first = tokio::spawn({
        let manager = manager.clone();
        async move { manager.send(RequestKind::MarkRead, json!({ "chat_id": "c1" })).await }
    });
    let a = server.next_request().await;
    let second = tokio::spawn({
        let manager = manager.clone();
        async move { manager.send(RequestKind::MarkRead, json!({ "chat_id": "c2" })).await }
    });
    let b = server.next_request().await;
    assert_ne!(a.correlation_id, b.correlation_id);

    server.reply(&b, json!({ "which": b.payload["chat_id"] }));
    server.reply(&a, json!({ "which": a.payload["chat_id"] }));

    assert_eq!(first.await.unwrap().unwrap()["which"], "c1");
    assert_eq!(second.await.unwrap().unwrap()["which"], "c2");
}

#[tokio::test]
async fn error_response_maps_to_server_error() {
    let (manager, mut server) = connected_pair(Duration::from_secs(2)).await;

    let call = tokio::spawn({
        let manager = manager.clone();
        async move { manager.send(RequestKind::Unsend, json!({})).await }
    });
    let request = server.next_request().await;
    server.push(&Envelope::error_response_to(
        &request,
        WireError::new("forbidden", "not your message"),
    ));

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, RequestError::Server { ref code, .. } if code == "forbidden"));
}

#[tokio::test]
async fn timed_out_request_ignores_late_response() {
    let (manager, mut server) = connected_pair(Duration::from_millis(100)).await;
    let seen = Arc::new(Mutex::new(Vec::<String>::new()));
    let _sub = manager.subscribe({
        let seen = Arc::clone(&seen);
        move |env| seen.lock().push(env.kind.clone())
    });

    let call = tokio::spawn({
        let manager = manager.clone();
        async move { manager.send(RequestKind::FetchSyncActions, json!({})).await }
    });
    let request = server.next_request().await;

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, RequestError::Timeout(_)));
    assert_eq!(manager.pending_requests(), 0);

    server.reply(&request, json!({ "actions": [] }));
    server.push(&Envelope::event("sync_action", json!({})));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(*seen.lock(), vec!["sync_action".to_string()]);
    assert_eq!(manager.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn broadcasts_reach_every_subscriber() {
    let (manager, server) = connected_pair(Duration::from_secs(2)).await;
    let count = Arc::new(Mutex::new(0usize));
    let subs: Vec<_> = (0..2)
        .map(|_| {
            let count = Arc::clone(&count);
            manager.subscribe(move |env| {
                assert_eq!(env.kind, "read_receipt");
                *count.lock() += 1;
            })
        })
        .collect();

    server.push(&Envelope::event(
        "read_receipt",
        json!({ "chat_id": "c1", "read_at": "2026-01-01T00:00:00Z" }),
    ));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*count.lock(), 2);

    for sub in subs {
        sub.unsubscribe();
    }
    server.push(&Envelope::event("read_receipt", json!({})));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*count.lock(), 2);
}

#[tokio::test]
async fn in_flight_request_fails_when_connection_drops() {
    let (manager, mut server) = connected_pair(Duration::from_secs(5)).await;

    let call = tokio::spawn({
        let manager = manager.clone();
        async move { manager.send(RequestKind::ListChats, json!({})).await }
    });
    let _request = server.next_request().await;
    drop(server);

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, RequestError::ConnectionLost));
    assert_eq!(manager.pending_requests(), 0);
    assert_ne!(manager.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn disconnect_rejects_pending_and_stops() {
    let (manager, mut server) = connected_pair(Duration::from_secs(5)).await;

    let call = tokio::spawn({
        let manager = manager.clone();
        async move { manager.send(RequestKind::ListChats, json!({})).await }
    });
    let _request = server.next_request().await;
    manager.disconnect().await;

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, RequestError::Disconnecting));
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(matches!(
        manager.send(RequestKind::ListChats, json!({})).await,
        Err(RequestError::NotConnected)
    ));
}
