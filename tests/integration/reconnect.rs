// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for automatic reconnection and catch-up.
//!
//! The backend closes every socket with `close_all_connections`; clients
//! must back off, reconnect, and then replay whatever they missed through
//! the sync engine.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chatsync::transport::ConnectionState;
use chatsync::transport::target::{AuthMode, StaticSession};
use chatsync_proto::message::UserId;

use common::{ALICE_TOKEN, BOB_TOKEN, client, client_with, connected, eventually, start_backend};

#[tokio::test]
async fn client_reconnects_after_server_closes_socket() {
    let backend = start_backend().await;
    let (alice, _bg) = client(&backend.url(), "alice", ALICE_TOKEN);
    connected(&alice).await;

    let mut states = alice.transport().watch_state();
    backend.state.close_all_connections().await;

    tokio::time::timeout(
        Duration::from_secs(3),
        states.wait_for(|s| *s == ConnectionState::Reconnecting),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(alice.transport().wait_connected(Duration::from_secs(3)).await);

    assert_eq!(alice.refresh_chats().await.unwrap(), 1);
    assert!(backend.state.is_online(&UserId::new("alice")).await);
}

#[tokio::test]
async fn missed_messages_are_caught_up_after_reconnect() {
    let backend = start_backend().await;
    let (bob, mut bob_errors) = client_with(
        &backend.url(),
        "bob",
        AuthMode::Token,
        Arc::new(StaticSession::with_token("bob", BOB_TOKEN)),
        Duration::from_millis(400),
    );
    connected(&bob).await;
    bob.refresh_chats().await.unwrap();
    bob.open_chat(&backend.chat).await.unwrap();

    backend.state.close_all_connections().await;
    let bob_id = UserId::new("bob");
    let state = Arc::clone(&backend.state);
    let mut offline = false;
    for _ in 0..100 {
        if !state.is_online(&bob_id).await {
            offline = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(offline, "bob's socket was not closed");

    backend.send_as("alice", "bob", "while you were away", "temp-away").await;
    assert_eq!(backend.state.store.pending_actions(&bob_id).await.len(), 1);

    assert!(bob.transport().wait_connected(Duration::from_secs(3)).await);
    let chat = backend.chat.clone();
    assert!(
        eventually(Duration::from_secs(3), || bob.with_store(|s| {
            s.messages(&chat)
                .iter()
                .any(|m| m.content == "while you were away")
        }))
        .await,
        "missed message was not replayed"
    );

    let mut acked = false;
    for _ in 0..100 {
        if backend.state.store.pending_actions(&bob_id).await.is_empty() {
            acked = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(acked, "sync actions were not acknowledged");
    assert!(bob_errors.try_recv().is_err());
}

#[tokio::test]
async fn intentional_disconnect_does_not_reconnect() {
    let backend = start_backend().await;
    let (alice, _bg) = client(&backend.url(), "alice", ALICE_TOKEN);
    connected(&alice).await;

    alice.disconnect().await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(alice.state(), ConnectionState::Disconnected);
    assert!(!backend.state.is_online(&UserId::new("alice")).await);

    // Requests keep working over REST.
    assert_eq!(alice.refresh_chats().await.unwrap(), 1);
}

#[tokio::test]
async fn cookie_session_authenticates_socket() {
    let backend = start_backend().await;
    let session = StaticSession::new(chatsync::transport::target::Credentials {
        user_id: UserId::new("bob"),
        token: None,
        cookie: Some(format!("session={BOB_TOKEN}")),
    });
    let (bob, _bg) = client_with(
        &backend.url(),
        "bob",
        AuthMode::Cookie,
        Arc::new(session),
        Duration::from_millis(50),
    );
    connected(&bob).await;
    assert!(backend.state.is_online(&UserId::new("bob")).await);
}
