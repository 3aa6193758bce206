//! Property-based tests for the wire codec and message lifecycle.
//!
//! Uses proptest to verify:
//! 1. Arbitrary text never makes `codec::decode` or `ServerEvent::parse` panic.
//! 2. Any envelope survives encode -> decode.
//! 3. Message status never moves backwards, whatever order updates arrive in.
//! 4. Chat horizons only ever advance.

use proptest::prelude::*;
use serde_json::{Value, json};

use chatsync_proto::codec::{self, Envelope};
use chatsync_proto::event::ServerEvent;
use chatsync_proto::message::{
    ChatId, ChatSummary, Message, MessageStatus, Timestamp, UserId,
};

fn arb_status() -> impl Strategy<Value = MessageStatus> {
    prop_oneof![
        Just(MessageStatus::Pending),
        Just(MessageStatus::Sent),
        Just(MessageStatus::Delivered),
        Just(MessageStatus::Read),
    ]
}

fn arb_kind() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("new_message".to_string()),
        Just("delivery_ack".to_string()),
        Just("read_receipt".to_string()),
        Just("unsend".to_string()),
        Just("delete_for_me".to_string()),
        Just("sync_action".to_string()),
        Just("error".to_string()),
        "[a-z_]{1,20}",
    ]
}

fn arb_payload() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        ".{0,16}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::hash_map("[a-z_]{1,12}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
    (0i64..4_000_000_000_000).prop_map(Timestamp::from_millis)
}

proptest! {
    #[test]
    fn decode_arbitrary_text_never_panics(text in ".{0,256}") {
        let _ = codec::decode(&text);
    }

    #[test]
    fn parse_arbitrary_event_never_panics(kind in arb_kind(), payload in arb_payload()) {
        let _ = ServerEvent::parse(&kind, &payload);
    }

    #[test]
    fn envelope_survives_encode_decode(
        kind in "[a-z_]{1,24}",
        payload in arb_payload(),
        correlation_id in proptest::option::of("[a-f0-9-]{1,36}"),
    ) {
        let envelope = Envelope { kind, payload, correlation_id, error: None };
        let frame = codec::encode(&envelope).unwrap();
        prop_assert_eq!(codec::decode(&frame).unwrap(), envelope);
    }

    #[test]
    fn status_never_regresses(updates in prop::collection::vec(arb_status(), 0..16)) {
        let mut msg = Message::optimistic(
            ChatId::new("c1"),
            UserId::new("alice"),
            UserId::new("bob"),
            "hello",
        );
        let mut highest = msg.status;
        for next in updates {
            msg.advance_status(next);
            prop_assert!(msg.status >= highest);
            highest = highest.max(next);
            prop_assert_eq!(msg.status, highest);
        }
    }

    #[test]
    fn horizons_only_advance(instants in prop::collection::vec(arb_timestamp(), 0..16)) {
        let mut chat = ChatSummary::new(ChatId::new("c1"), UserId::new("bob"));
        let mut max_seen: Option<Timestamp> = None;
        for at in instants {
            chat.advance_read_horizon(at);
            max_seen = max_seen.max(Some(at));
            prop_assert_eq!(chat.other_user_last_read_at, max_seen);
            prop_assert!(chat.effective_delivered_horizon() >= chat.other_user_last_read_at);
        }
    }
}
