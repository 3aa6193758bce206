// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for sending without a socket.
//!
//! Clients here never call `connect`, so every request goes over the REST
//! fallback. Covers the optimistic entry being replaced by the server copy,
//! server-side rejections, and an unreachable backend.

mod common;

use serde_json::json;

use chatsync::chat::SendError;
use chatsync::chat::store::StoreEvent;
use chatsync::transport::RequestError;
use chatsync_proto::codec::Envelope;
use chatsync_proto::event::kind;
use chatsync_proto::message::{ChatId, MessageId, MessageStatus, UserId};

use common::{ALICE_TOKEN, BOB_TOKEN, client, start_backend};

#[tokio::test]
async fn send_over_rest_replaces_optimistic_entry() {
    let backend = start_backend().await;
    let (alice, _bg) = client(&backend.url(), "alice", ALICE_TOKEN);
    assert_eq!(alice.refresh_chats().await.unwrap(), 1);
    alice.open_chat(&backend.chat).await.unwrap();
    alice.set_draft(&backend.chat, "hello bob");

    let sent = alice.send_text(&backend.chat, "hello bob").await.unwrap();
    assert!(!sent.id.is_temporary());
    assert_eq!(sent.status, MessageStatus::Sent);

    alice.with_store(|s| {
        let messages = s.messages(&backend.chat);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, sent.id);
        assert!(s.draft(&backend.chat).is_none());
        let summary = s.chat(&backend.chat).unwrap();
        assert!(summary.preview_is(&sent.id));
        assert_eq!(summary.last_message_content.as_deref(), Some("hello bob"));
    });

    // Bob has no socket: the event waits for him as a sync action.
    let queued = backend.state.store.pending_actions(&UserId::new("bob")).await;
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].kind, kind::NEW_MESSAGE);
}

#[tokio::test]
async fn history_pages_load_over_rest() {
    let backend = start_backend().await;
    for i in 0..5 {
        backend
            .send_as("bob", "alice", &format!("m{i}"), &format!("temp-{i}"))
            .await;
    }
    let (alice, _bg) = client(&backend.url(), "alice", ALICE_TOKEN);
    alice.refresh_chats().await.unwrap();
    assert_eq!(
        alice.with_store(|s| s.chat(&backend.chat).unwrap().unread_count),
        5
    );

    alice.open_chat(&backend.chat).await.unwrap();
    let contents = alice.with_store(|s| {
        s.messages(&backend.chat)
            .into_iter()
            .map(|m| m.content)
            .collect::<Vec<_>>()
    });
    assert_eq!(contents, vec!["m0", "m1", "m2", "m3", "m4"]);
    assert!(!alice.with_store(|s| s.has_more(&backend.chat)));
}

#[tokio::test]
async fn server_rejection_changes_nothing_locally() {
    let backend = start_backend().await;
    let sent = backend.send_as("bob", "alice", "mine", "temp-b").await;
    let id = MessageId::new(sent["message"]["id"].as_str().unwrap());

    let (alice, _bg) = client(&backend.url(), "alice", ALICE_TOKEN);
    alice.refresh_chats().await.unwrap();
    alice.open_chat(&backend.chat).await.unwrap();

    let err = alice.unsend(&backend.chat, &[id.clone()]).await.unwrap_err();
    assert!(matches!(err, RequestError::Server { ref code, .. } if code == "forbidden"));
    alice.with_store(|s| {
        let msg = s.message(&backend.chat, &id).unwrap();
        assert!(!msg.is_tombstone());
    });
}

#[tokio::test]
async fn unreachable_backend_restores_draft() {
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let (alice, _bg) = client(&format!("http://{addr}"), "alice", ALICE_TOKEN);
    alice.with_store(|s| assert!(s.chats().is_empty()));
    assert!(alice.refresh_chats().await.is_err());

    // A pushed message makes the chat known locally.
    let chat = ChatId::new("c-offline");
    alice.handle_envelope(&Envelope::event(
        kind::NEW_MESSAGE,
        json!({
            "message": {
                "id": "srv-0",
                "chat_id": chat,
                "sender_id": "bob",
                "recipient_id": "alice",
                "content": "earlier",
                "type": "text",
                "created_at": "2026-01-01T00:00:00Z",
            }
        }),
    ));
    let mut events = alice.subscribe_store();

    let err = alice.send_text(&chat, "are you there?").await.unwrap_err();
    assert!(matches!(err, SendError::Request(RequestError::Io(_))));

    alice.with_store(|s| {
        assert!(s.messages(&chat).iter().all(|m| m.content != "are you there?"));
        assert_eq!(s.draft(&chat), Some("are you there?"));
        let preview = s.chat(&chat).unwrap();
        assert_eq!(preview.last_message_content.as_deref(), Some("earlier"));
    });

    let mut failed = false;
    while let Ok(event) = events.try_recv() {
        failed |= matches!(event, StoreEvent::SendFailed { .. });
    }
    assert!(failed);
}

#[tokio::test]
async fn bob_reads_over_rest_and_alice_sees_receipt_on_sync() {
    let backend = start_backend().await;
    let (alice, _a) = client(&backend.url(), "alice", ALICE_TOKEN);
    let (bob, _b) = client(&backend.url(), "bob", BOB_TOKEN);
    alice.refresh_chats().await.unwrap();
    alice.open_chat(&backend.chat).await.unwrap();
    let sent = alice.send_text(&backend.chat, "read me").await.unwrap();

    bob.refresh_chats().await.unwrap();
    bob.mark_read(&backend.chat).await.unwrap();

    let report = alice.sync_now().await.unwrap();
    assert!(report.applied >= 1);
    alice.with_store(|s| {
        let msg = s.message(&backend.chat, &sent.id).unwrap();
        assert_eq!(s.status_of(msg), MessageStatus::Read);
    });
}
