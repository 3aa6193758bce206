//! Broadcast events pushed by the server.
//!
//! The server tags every event with a string type; this module turns that
//! string plus its JSON payload into the closed [`ServerEvent`] enum so the
//! router can match exhaustively.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::Envelope;
use crate::message::{ChatId, Message, MessageId, Timestamp, UserId};

/// Wire names of the broadcast event types.
pub mod kind {
    /// A new message was created.
    pub const NEW_MESSAGE: &str = "new_message";
    /// Messages reached the other participant.
    pub const DELIVERY_ACK: &str = "delivery_ack";
    /// The other participant read up to an instant.
    pub const READ_RECEIPT: &str = "read_receipt";
    /// Messages were unsent by their author.
    pub const UNSEND: &str = "unsend";
    /// Messages were deleted for this user only.
    pub const DELETE_FOR_ME: &str = "delete_for_me";
    /// Server-recorded actions are waiting to be fetched.
    pub const SYNC_ACTION: &str = "sync_action";
    /// Server-side error notification.
    pub const ERROR: &str = "error";
}

/// Error produced when a known event type carries a malformed payload.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// The payload did not match the event's schema.
    #[error("malformed {kind} payload: {reason}")]
    MalformedPayload {
        /// Event type that failed to parse.
        kind: &'static str,
        /// Underlying parse failure.
        reason: String,
    },
}

/// Payload of [`ServerEvent::NewMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessagePayload {
    /// The message as recorded by the server.
    pub message: Message,
}

/// Payload of [`ServerEvent::DeliveryAck`].
///
/// Either a single `message_id` or a batch of `message_ids` may be given,
/// optionally with a `delivered_at` horizon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAckPayload {
    /// Chat the acknowledged messages belong to.
    pub chat_id: ChatId,
    /// Single acknowledged id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    /// Batch of acknowledged ids.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub message_ids: Vec<MessageId>,
    /// Everything created at or before this instant is delivered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<Timestamp>,
    /// User the messages were delivered to. When it is the local user the
    /// event echoes an acknowledgement this client sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<UserId>,
}

impl DeliveryAckPayload {
    /// All acknowledged ids, single and batch combined.
    #[must_use]
    pub fn ids(&self) -> Vec<MessageId> {
        let mut ids = self.message_ids.clone();
        if let Some(id) = &self.message_id
            && !ids.contains(id)
        {
            ids.push(id.clone());
        }
        ids
    }
}

/// Payload of [`ServerEvent::ReadReceipt`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceiptPayload {
    /// Chat that was read.
    pub chat_id: ChatId,
    /// Everything created at or before this instant is read.
    pub read_at: Timestamp,
    /// User who read the chat. When it is the local user the event echoes
    /// a mark-read issued from this account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reader_id: Option<UserId>,
}

/// Payload shared by [`ServerEvent::Unsend`] and [`ServerEvent::DeleteForMe`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRefsPayload {
    /// Chat the referenced messages belong to.
    pub chat_id: ChatId,
    /// Single referenced id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    /// Batch of referenced ids.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub message_ids: Vec<MessageId>,
}

impl MessageRefsPayload {
    /// All referenced ids, single and batch combined.
    #[must_use]
    pub fn ids(&self) -> Vec<MessageId> {
        let mut ids = self.message_ids.clone();
        if let Some(id) = &self.message_id
            && !ids.contains(id)
        {
            ids.push(id.clone());
        }
        ids
    }
}

/// Payload of [`ServerEvent::SyncAction`]; a nudge, the details are fetched separately.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncNudgePayload {
    /// Id of the action that triggered the nudge, if the server names one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<String>,
}

/// Payload of [`ServerEvent::Error`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Machine-readable error code.
    #[serde(default)]
    pub code: String,
    /// Human-readable description.
    #[serde(default)]
    pub message: String,
}

/// Closed set of broadcast events, each with a typed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A message was created.
    NewMessage(NewMessagePayload),
    /// Messages reached the other participant.
    DeliveryAck(DeliveryAckPayload),
    /// The other participant read the chat up to an instant.
    ReadReceipt(ReadReceiptPayload),
    /// Messages were unsent.
    Unsend(MessageRefsPayload),
    /// Messages were deleted for this user.
    DeleteForMe(MessageRefsPayload),
    /// Server-recorded actions are waiting.
    SyncAction(SyncNudgePayload),
    /// Server-side error.
    Error(ErrorPayload),
}

impl ServerEvent {
    /// Parses a typed event from a wire type and payload.
    ///
    /// Returns `Ok(None)` for types this client does not model.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::MalformedPayload`] if a known type carries a
    /// payload that does not match its schema.
    pub fn parse(event_type: &str, payload: &Value) -> Result<Option<Self>, EventError> {
        let event = match event_type {
            kind::NEW_MESSAGE => Self::NewMessage(from_payload(kind::NEW_MESSAGE, payload)?),
            kind::DELIVERY_ACK => Self::DeliveryAck(from_payload(kind::DELIVERY_ACK, payload)?),
            kind::READ_RECEIPT => Self::ReadReceipt(from_payload(kind::READ_RECEIPT, payload)?),
            kind::UNSEND => Self::Unsend(from_payload(kind::UNSEND, payload)?),
            kind::DELETE_FOR_ME => Self::DeleteForMe(from_payload(kind::DELETE_FOR_ME, payload)?),
            kind::SYNC_ACTION => Self::SyncAction(from_payload(kind::SYNC_ACTION, payload)?),
            kind::ERROR => Self::Error(from_payload(kind::ERROR, payload)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    /// Parses a typed event from a broadcast envelope.
    ///
    /// # Errors
    ///
    /// See [`ServerEvent::parse`].
    pub fn from_envelope(envelope: &Envelope) -> Result<Option<Self>, EventError> {
        Self::parse(&envelope.kind, &envelope.payload)
    }

    /// Returns the wire type of this event.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => kind::NEW_MESSAGE,
            Self::DeliveryAck(_) => kind::DELIVERY_ACK,
            Self::ReadReceipt(_) => kind::READ_RECEIPT,
            Self::Unsend(_) => kind::UNSEND,
            Self::DeleteForMe(_) => kind::DELETE_FOR_ME,
            Self::SyncAction(_) => kind::SYNC_ACTION,
            Self::Error(_) => kind::ERROR,
        }
    }

    /// Serializes this event back into an uncorrelated envelope.
    #[must_use]
    pub fn to_envelope(&self) -> Envelope {
        let payload = match self {
            Self::NewMessage(p) => serde_json::to_value(p),
            Self::DeliveryAck(p) => serde_json::to_value(p),
            Self::ReadReceipt(p) => serde_json::to_value(p),
            Self::Unsend(p) | Self::DeleteForMe(p) => serde_json::to_value(p),
            Self::SyncAction(p) => serde_json::to_value(p),
            Self::Error(p) => serde_json::to_value(p),
        };
        Envelope::event(self.kind(), payload.unwrap_or(Value::Null))
    }
}

fn from_payload<T: serde::de::DeserializeOwned>(
    kind: &'static str,
    payload: &Value,
) -> Result<T, EventError> {
    T::deserialize(payload).map_err(|e| EventError::MalformedPayload {
        kind,
        reason: e.to_string(),
    })
}
