// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for the sync engine and live event handling against
//! the in-process backend.

mod common;

use std::time::Duration;

use serde_json::json;

use chatsync::chat::store::StoreEvent;
use chatsync_backend::server;
use chatsync_proto::message::{MessageId, MessageStatus, UserId};
use chatsync_proto::request::RequestKind;

use common::{ALICE_TOKEN, BOB_TOKEN, client, connected, eventually, start_backend};

#[tokio::test]
async fn sync_applies_and_acknowledges_queued_actions() {
    let backend = start_backend().await;
    backend.send_as("alice", "bob", "first", "temp-1").await;
    let second = backend.send_as("alice", "bob", "second", "temp-2").await;
    let second_id = MessageId::new(second["message"]["id"].as_str().unwrap());
    server::dispatch(
        &backend.state,
        &UserId::new("alice"),
        RequestKind::Unsend,
        json!({ "chat_id": backend.chat, "message_ids": [second_id] }),
    )
    .await
    .unwrap();

    let (bob, _bg) = client(&backend.url(), "bob", BOB_TOKEN);
    bob.refresh_chats().await.unwrap();
    bob.open_chat(&backend.chat).await.unwrap();

    let report = bob.sync_now().await.unwrap();
    assert_eq!(report.applied, 3);
    assert_eq!(report.skipped, 0);

    bob.with_store(|s| {
        let messages = s.messages(&backend.chat);
        assert_eq!(messages.len(), 2);
        assert!(s.message(&backend.chat, &second_id).unwrap().is_tombstone());
        let summary = s.chat(&backend.chat).unwrap();
        assert!(!summary.preview_is(&second_id));
    });

    let bob_id = UserId::new("bob");
    assert!(backend.state.store.pending_actions(&bob_id).await.is_empty());
    assert_eq!(bob.sync_now().await.unwrap().applied, 0);
}

#[tokio::test]
async fn empty_sync_is_a_no_op() {
    let backend = start_backend().await;
    let (alice, _bg) = client(&backend.url(), "alice", ALICE_TOKEN);
    let report = alice.sync_now().await.unwrap();
    assert_eq!(report.applied, 0);
    assert!(report.follow_ups.is_empty());
}

#[tokio::test]
async fn live_delivery_and_read_receipts() {
    let backend = start_backend().await;
    let (alice, _a) = client(&backend.url(), "alice", ALICE_TOKEN);
    let (bob, mut bob_errors) = client(&backend.url(), "bob", BOB_TOKEN);
    connected(&alice).await;
    connected(&bob).await;
    alice.refresh_chats().await.unwrap();
    bob.refresh_chats().await.unwrap();
    alice.open_chat(&backend.chat).await.unwrap();

    let mut alice_events = alice.subscribe_store();
    let sent = alice.send_text(&backend.chat, "ping").await.unwrap();

    // Bob's chat is closed: preview and unread only.
    let chat = backend.chat.clone();
    assert!(
        eventually(Duration::from_secs(3), || bob.with_store(|s| {
            let summary = s.chat(&chat).unwrap();
            summary.preview_is(&sent.id) && summary.unread_count == 1
        }))
        .await
    );
    assert!(bob.with_store(|s| s.messages(&chat).is_empty()));

    // The inbound message was acknowledged, so alice sees it delivered.
    assert!(
        eventually(Duration::from_secs(3), || alice.with_store(|s| {
            s.message(&chat, &sent.id)
                .is_some_and(|m| s.status_of(m) == MessageStatus::Delivered)
        }))
        .await,
        "delivery ack did not reach the sender"
    );

    // Opening the chat marks it read after the debounce.
    bob.open_chat(&chat).await.unwrap();
    assert!(bob.with_store(|s| s.chat(&chat).unwrap().unread_count == 0));
    assert!(
        eventually(Duration::from_secs(3), || alice.with_store(|s| {
            s.message(&chat, &sent.id)
                .is_some_and(|m| s.status_of(m) == MessageStatus::Read)
        }))
        .await,
        "read receipt did not reach the sender"
    );

    let mut changed = false;
    while let Ok(event) = alice_events.try_recv() {
        changed |= matches!(event, StoreEvent::ChatListChanged);
    }
    assert!(changed);
    assert!(bob_errors.try_recv().is_err());
}

#[tokio::test]
async fn unsend_reaches_the_other_side_live() {
    let backend = start_backend().await;
    let (alice, _a) = client(&backend.url(), "alice", ALICE_TOKEN);
    let (bob, _b) = client(&backend.url(), "bob", BOB_TOKEN);
    connected(&alice).await;
    connected(&bob).await;
    alice.refresh_chats().await.unwrap();
    bob.refresh_chats().await.unwrap();
    alice.open_chat(&backend.chat).await.unwrap();
    bob.open_chat(&backend.chat).await.unwrap();

    let sent = alice.send_text(&backend.chat, "oops").await.unwrap();
    let chat = backend.chat.clone();
    assert!(
        eventually(Duration::from_secs(3), || bob
            .with_store(|s| s.message(&chat, &sent.id).is_some()))
        .await
    );

    // The echoed event may tombstone alice's copy before the response does.
    alice.unsend(&chat, &[sent.id.clone()]).await.unwrap();
    assert!(alice.with_store(|s| s.message(&chat, &sent.id).unwrap().is_tombstone()));
    assert!(
        eventually(Duration::from_secs(3), || bob.with_store(|s| {
            s.message(&chat, &sent.id).is_some_and(|m| m.is_tombstone())
                && !s.chat(&chat).unwrap().preview_is(&sent.id)
        }))
        .await
    );
}
