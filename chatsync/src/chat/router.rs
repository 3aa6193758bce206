//! Event router: applies typed server events to the conversation store.
//!
//! Every handler is idempotent, since events arrive at least once (live
//! broadcast, then again through sync catch-up). Handlers never perform
//! network I/O themselves; anything that needs the network is returned as
//! a [`FollowUp`] for the caller to dispatch in the background.

use chatsync_proto::event::{
    DeliveryAckPayload, MessageRefsPayload, NewMessagePayload, ReadReceiptPayload, ServerEvent,
};
use chatsync_proto::message::{ChatId, MessageId, MessageStatus};

use super::ack::AckTracker;
use super::store::ConversationStore;

/// Network work requested by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowUp {
    /// Schedule a debounced mark-read for the chat.
    MarkRead(ChatId),
    /// Acknowledge delivery of inbound messages.
    AckDelivery {
        /// Chat the messages belong to.
        chat_id: ChatId,
        /// Inbound ids to acknowledge.
        message_ids: Vec<MessageId>,
    },
    /// Run the sync engine.
    Sync,
}

/// Stateless dispatcher from [`ServerEvent`] to store mutations.
#[derive(Debug, Default, Clone, Copy)]
pub struct EventRouter;

impl EventRouter {
    /// Create a router.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Apply `event` to `store`, returning the follow-ups it requires.
    pub fn apply(
        &self,
        store: &mut ConversationStore,
        acks: &AckTracker,
        event: &ServerEvent,
    ) -> Vec<FollowUp> {
        tracing::trace!(kind = event.kind(), "routing event");
        match event {
            ServerEvent::NewMessage(payload) => Self::new_message(store, payload),
            ServerEvent::DeliveryAck(payload) => {
                Self::delivery_ack(store, acks, payload);
                Vec::new()
            }
            ServerEvent::ReadReceipt(payload) => {
                Self::read_receipt(store, payload);
                Vec::new()
            }
            ServerEvent::Unsend(payload) => {
                Self::unsend(store, payload);
                Vec::new()
            }
            ServerEvent::DeleteForMe(payload) => {
                Self::delete_for_me(store, payload);
                Vec::new()
            }
            ServerEvent::SyncAction(_) => vec![FollowUp::Sync],
            ServerEvent::Error(payload) => {
                tracing::warn!(code = %payload.code, message = %payload.message, "server reported error");
                Vec::new()
            }
        }
    }

    fn new_message(store: &mut ConversationStore, payload: &NewMessagePayload) -> Vec<FollowUp> {
        let mut msg = payload.message.clone();
        // Anything on the wire is server-confirmed.
        if msg.status == MessageStatus::Pending {
            msg.status = MessageStatus::Sent;
        }
        let chat_id = msg.chat_id.clone();
        if store.is_retired(&chat_id, &msg.id) {
            tracing::debug!(chat_id = %chat_id, message_id = %msg.id, "new_message for unsent or deleted message ignored");
            return Vec::new();
        }
        let inbound = msg.is_inbound_for(store.me());
        let active = store.is_active(&chat_id);
        let mut follow_ups = Vec::new();

        if active && store.insert_message(msg.clone()) && inbound {
            follow_ups.push(FollowUp::MarkRead(chat_id.clone()));
        }
        store.upsert_preview(&msg, inbound && !active);

        if inbound {
            follow_ups.push(FollowUp::AckDelivery {
                chat_id,
                message_ids: vec![msg.id],
            });
        }
        follow_ups
    }

    fn delivery_ack(store: &mut ConversationStore, acks: &AckTracker, payload: &DeliveryAckPayload) {
        let ids = payload.ids();
        acks.release(&ids);
        if payload.recipient_id.as_ref() == Some(store.me()) {
            // Echo of our own acknowledgement.
            return;
        }
        match payload.delivered_at {
            Some(at) => {
                store.advance_delivered_horizon(&payload.chat_id, at);
            }
            None => {
                store.mark_delivered(&payload.chat_id, &ids);
            }
        }
    }

    fn read_receipt(store: &mut ConversationStore, payload: &ReadReceiptPayload) {
        if payload.reader_id.as_ref() == Some(store.me()) {
            store.reset_unread(&payload.chat_id);
            return;
        }
        store.advance_read_horizon(&payload.chat_id, payload.read_at);
    }

    fn unsend(store: &mut ConversationStore, payload: &MessageRefsPayload) {
        let ids = payload.ids();
        let changed = store.tombstone_messages(&payload.chat_id, &ids);
        tracing::debug!(chat_id = %payload.chat_id, changed, "applied unsend");
    }

    fn delete_for_me(store: &mut ConversationStore, payload: &MessageRefsPayload) {
        let ids = payload.ids();
        let removed = store.remove_messages(&payload.chat_id, &ids);
        tracing::debug!(chat_id = %payload.chat_id, removed, "applied delete-for-me");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::SyncConfig;
    use chatsync_proto::event::{ErrorPayload, SyncNudgePayload};
    use chatsync_proto::message::{Message, MessageType, Timestamp, UserId};

    fn setup() -> (EventRouter, ConversationStore, AckTracker) {
        let config = SyncConfig {
            horizon_tolerance: Duration::ZERO,
            ..SyncConfig::default()
        };
        (
            EventRouter::new(),
            ConversationStore::new(UserId::new("alice"), &config),
            AckTracker::new(64),
        )
    }

    fn message(id: &str, from: &str, to: &str, at: i64) -> Message {
        Message {
            id: MessageId::new(id),
            chat_id: ChatId::new("c1"),
            sender_id: UserId::new(from),
            recipient_id: UserId::new(to),
            content: format!("body {id}"),
            message_type: MessageType::Text,
            created_at: Timestamp::from_millis(at),
            status: MessageStatus::Sent,
            delivered_to_recipient: false,
            file: None,
            temp_id: None,
        }
    }

    fn new_message(msg: Message) -> ServerEvent {
        ServerEvent::NewMessage(NewMessagePayload { message: msg })
    }

    fn chat() -> ChatId {
        ChatId::new("c1")
    }

    #[test]
    fn replayed_new_message_is_stored_once() {
        let (router, mut store, acks) = setup();
        store.open_chat(&chat());
        let event = new_message(message("m1", "bob", "alice", 1_000));
        let first = router.apply(&mut store, &acks, &event);
        let second = router.apply(&mut store, &acks, &event);

        assert_eq!(store.messages(&chat()).len(), 1);
        assert!(first.contains(&FollowUp::MarkRead(chat())));
        assert!(!second.contains(&FollowUp::MarkRead(chat())));
        assert_eq!(store.chat(&chat()).unwrap().unread_count, 0);
    }

    #[test]
    fn inactive_chat_gets_preview_and_unread_only() {
        let (router, mut store, acks) = setup();
        let follow_ups = router.apply(
            &mut store,
            &acks,
            &new_message(message("m1", "bob", "alice", 1_000)),
        );

        assert!(store.ledger(&chat()).is_none());
        let summary = store.chat(&chat()).unwrap();
        assert_eq!(summary.unread_count, 1);
        assert_eq!(summary.last_message_content.as_deref(), Some("body m1"));
        assert_eq!(
            follow_ups,
            vec![FollowUp::AckDelivery {
                chat_id: chat(),
                message_ids: vec![MessageId::new("m1")],
            }]
        );
    }

    #[test]
    fn outbound_message_does_not_count_unread_or_ack() {
        let (router, mut store, acks) = setup();
        let follow_ups = router.apply(
            &mut store,
            &acks,
            &new_message(message("m1", "alice", "bob", 1_000)),
        );
        assert!(follow_ups.is_empty());
        assert_eq!(store.chat(&chat()).unwrap().unread_count, 0);
    }

    #[test]
    fn pending_on_the_wire_becomes_sent() {
        let (router, mut store, acks) = setup();
        store.open_chat(&chat());
        let mut msg = message("m1", "alice", "bob", 1_000);
        msg.status = MessageStatus::Pending;
        router.apply(&mut store, &acks, &new_message(msg));
        assert_eq!(
            store.message(&chat(), &MessageId::new("m1")).unwrap().status,
            MessageStatus::Sent
        );
    }

    #[test]
    fn delivery_horizon_marks_exactly_the_older_messages() {
        let (router, mut store, acks) = setup();
        store.open_chat(&chat());
        for (id, at) in [("a", 1_000), ("b", 2_000), ("c", 2_001)] {
            router.apply(&mut store, &acks, &new_message(message(id, "alice", "bob", at)));
        }
        let ack = ServerEvent::DeliveryAck(DeliveryAckPayload {
            chat_id: chat(),
            message_id: None,
            message_ids: vec![MessageId::new("b")],
            delivered_at: Some(Timestamp::from_millis(2_000)),
            recipient_id: Some(UserId::new("bob")),
        });
        router.apply(&mut store, &acks, &ack);

        let statuses: Vec<_> = store
            .messages(&chat())
            .iter()
            .map(|m| store.status_of(m))
            .collect();
        assert_eq!(
            statuses,
            vec![MessageStatus::Delivered, MessageStatus::Delivered, MessageStatus::Sent]
        );
    }

    #[test]
    fn echoed_ack_only_releases_tracker() {
        let (router, mut store, acks) = setup();
        router.apply(&mut store, &acks, &new_message(message("m1", "bob", "alice", 1_000)));
        acks.try_begin(&MessageId::new("m1"));
        let echo = ServerEvent::DeliveryAck(DeliveryAckPayload {
            chat_id: chat(),
            message_id: Some(MessageId::new("m1")),
            message_ids: Vec::new(),
            delivered_at: Some(Timestamp::from_millis(1_000)),
            recipient_id: Some(UserId::new("alice")),
        });
        router.apply(&mut store, &acks, &echo);
        assert!(acks.is_empty());
        assert!(store.chat(&chat()).unwrap().other_user_last_delivered_at.is_none());
    }

    #[test]
    fn read_receipt_after_delivery_keeps_later_horizon() {
        let (router, mut store, acks) = setup();
        router.apply(&mut store, &acks, &new_message(message("m1", "alice", "bob", 0)));
        router.apply(
            &mut store,
            &acks,
            &ServerEvent::DeliveryAck(DeliveryAckPayload {
                chat_id: chat(),
                message_id: None,
                message_ids: Vec::new(),
                delivered_at: Some(Timestamp::from_millis(10_000)),
                recipient_id: None,
            }),
        );
        let read = ServerEvent::ReadReceipt(ReadReceiptPayload {
            chat_id: chat(),
            read_at: Timestamp::from_millis(10_005),
            reader_id: Some(UserId::new("bob")),
        });
        router.apply(&mut store, &acks, &read);
        router.apply(&mut store, &acks, &read);

        let summary = store.chat(&chat()).unwrap();
        assert_eq!(summary.other_user_last_read_at, Some(Timestamp::from_millis(10_005)));
    }

    #[test]
    fn own_read_receipt_resets_unread() {
        let (router, mut store, acks) = setup();
        router.apply(&mut store, &acks, &new_message(message("m1", "bob", "alice", 1_000)));
        router.apply(
            &mut store,
            &acks,
            &ServerEvent::ReadReceipt(ReadReceiptPayload {
                chat_id: chat(),
                read_at: Timestamp::from_millis(1_000),
                reader_id: Some(UserId::new("alice")),
            }),
        );
        let summary = store.chat(&chat()).unwrap();
        assert_eq!(summary.unread_count, 0);
        assert!(summary.other_user_last_read_at.is_none());
    }

    #[test]
    fn unsend_of_preview_clears_it() {
        let (router, mut store, acks) = setup();
        store.open_chat(&chat());
        router.apply(&mut store, &acks, &new_message(message("m1", "bob", "alice", 1_000)));
        let unsend = ServerEvent::Unsend(MessageRefsPayload {
            chat_id: chat(),
            message_id: Some(MessageId::new("m1")),
            message_ids: Vec::new(),
        });
        router.apply(&mut store, &acks, &unsend);
        router.apply(&mut store, &acks, &unsend);

        let summary = store.chat(&chat()).unwrap();
        assert!(summary.last_message_id.is_none());
        assert!(summary.last_message_content.is_none());
        let msg = store.message(&chat(), &MessageId::new("m1")).unwrap();
        assert_eq!(msg.message_type, MessageType::Unsent);
        assert!(msg.content.is_empty());
    }

    fn unsend_event(id: &str) -> ServerEvent {
        ServerEvent::Unsend(MessageRefsPayload {
            chat_id: chat(),
            message_id: Some(MessageId::new(id)),
            message_ids: Vec::new(),
        })
    }

    #[test]
    fn replay_of_older_message_after_newer_one_is_a_no_op() {
        let (router, mut store, acks) = setup();
        let m1 = new_message(message("m1", "bob", "alice", 1_000));
        router.apply(&mut store, &acks, &m1);
        router.apply(&mut store, &acks, &new_message(message("m2", "bob", "alice", 2_000)));
        router.apply(&mut store, &acks, &m1);

        let summary = store.chat(&chat()).unwrap();
        assert_eq!(summary.unread_count, 2);
        assert!(summary.preview_is(&MessageId::new("m2")));
    }

    #[test]
    fn replay_after_unsend_keeps_tombstone_in_open_chat() {
        let (router, mut store, acks) = setup();
        store.open_chat(&chat());
        let m1 = new_message(message("m1", "bob", "alice", 1_000));
        router.apply(&mut store, &acks, &m1);
        router.apply(&mut store, &acks, &unsend_event("m1"));
        let follow_ups = router.apply(&mut store, &acks, &m1);

        assert!(follow_ups.is_empty());
        let msg = store.message(&chat(), &MessageId::new("m1")).unwrap();
        assert_eq!(msg.message_type, MessageType::Unsent);
        let summary = store.chat(&chat()).unwrap();
        assert!(summary.last_message_id.is_none());
        assert!(summary.last_message_content.is_none());
    }

    #[test]
    fn replay_after_unsend_in_closed_chat_changes_nothing() {
        let (router, mut store, acks) = setup();
        let m1 = new_message(message("m1", "bob", "alice", 1_000));
        router.apply(&mut store, &acks, &m1);
        router.apply(&mut store, &acks, &unsend_event("m1"));
        router.apply(&mut store, &acks, &m1);

        let summary = store.chat(&chat()).unwrap();
        assert_eq!(summary.unread_count, 1);
        assert!(summary.last_message_content.is_none());
    }

    #[test]
    fn replay_after_delete_for_me_does_not_restore_message() {
        let (router, mut store, acks) = setup();
        store.open_chat(&chat());
        let m1 = new_message(message("m1", "bob", "alice", 1_000));
        router.apply(&mut store, &acks, &m1);
        router.apply(
            &mut store,
            &acks,
            &ServerEvent::DeleteForMe(MessageRefsPayload {
                chat_id: chat(),
                message_id: Some(MessageId::new("m1")),
                message_ids: Vec::new(),
            }),
        );
        router.apply(&mut store, &acks, &m1);

        assert!(store.messages(&chat()).is_empty());
        assert!(store.chat(&chat()).unwrap().last_message_id.is_none());
    }

    #[test]
    fn delete_for_me_removes_entry() {
        let (router, mut store, acks) = setup();
        store.open_chat(&chat());
        router.apply(&mut store, &acks, &new_message(message("m1", "bob", "alice", 1_000)));
        router.apply(
            &mut store,
            &acks,
            &ServerEvent::DeleteForMe(MessageRefsPayload {
                chat_id: chat(),
                message_id: None,
                message_ids: vec![MessageId::new("m1")],
            }),
        );
        assert!(store.messages(&chat()).is_empty());
        assert!(store.chat(&chat()).unwrap().last_message_id.is_none());
    }

    #[test]
    fn sync_nudge_requests_sync_and_errors_are_absorbed() {
        let (router, mut store, acks) = setup();
        assert_eq!(
            router.apply(&mut store, &acks, &ServerEvent::SyncAction(SyncNudgePayload::default())),
            vec![FollowUp::Sync]
        );
        assert!(
            router
                .apply(&mut store, &acks, &ServerEvent::Error(ErrorPayload::default()))
                .is_empty()
        );
    }
}
