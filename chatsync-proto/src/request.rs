//! Request-style actions and their payloads.
//!
//! Each [`RequestKind`] has the same request/response contract whether it
//! travels over the WebSocket (as a correlated envelope) or over the REST
//! fallback (as a JSON body).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::response_type;
use crate::event::{EventError, ServerEvent};
use crate::message::{ChatId, ChatSummary, FileMeta, Message, MessageId, MessageType, UserId};

/// Closed set of request types the client issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Create a message.
    SendMessage,
    /// Confirm that inbound messages reached this device.
    AckDelivery,
    /// Mark a chat read up to now.
    MarkRead,
    /// Unsend own messages for both participants.
    Unsend,
    /// Delete messages for this user only.
    DeleteForMe,
    /// Fetch server-recorded actions not yet acknowledged.
    FetchSyncActions,
    /// Acknowledge processed sync actions, advancing the cursor.
    AckSyncActions,
    /// Fetch the chat list.
    ListChats,
    /// Fetch one page of a chat's history.
    FetchMessages,
}

impl RequestKind {
    /// Every request kind, in declaration order.
    pub const ALL: [Self; 9] = [
        Self::SendMessage,
        Self::AckDelivery,
        Self::MarkRead,
        Self::Unsend,
        Self::DeleteForMe,
        Self::FetchSyncActions,
        Self::AckSyncActions,
        Self::ListChats,
        Self::FetchMessages,
    ];

    /// Wire type of the request envelope.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SendMessage => "send_message",
            Self::AckDelivery => "ack_delivery",
            Self::MarkRead => "mark_read",
            Self::Unsend => "unsend",
            Self::DeleteForMe => "delete_for_me",
            Self::FetchSyncActions => "fetch_sync_actions",
            Self::AckSyncActions => "ack_sync_actions",
            Self::ListChats => "list_chats",
            Self::FetchMessages => "fetch_messages",
        }
    }

    /// Looks a request kind up by its wire type.
    #[must_use]
    pub fn from_wire(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == value)
    }

    /// Wire type of the matching response envelope.
    #[must_use]
    pub fn response_type(self) -> String {
        response_type(self.as_str())
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of [`RequestKind::SendMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    /// Target chat, when it already exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<ChatId>,
    /// Addressee.
    pub recipient_id: UserId,
    /// Text content.
    pub content: String,
    /// Content kind.
    #[serde(rename = "type", default)]
    pub message_type: MessageType,
    /// Client temporary key, echoed back for reconciliation.
    pub temp_id: MessageId,
    /// Optional attachment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileMeta>,
}

/// Response to [`RequestKind::SendMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageResponse {
    /// The authoritative message.
    pub message: Message,
    /// Echo of the request's temporary key.
    pub temp_id: MessageId,
}

/// Body of [`RequestKind::AckDelivery`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckDeliveryRequest {
    /// Chat the messages belong to.
    pub chat_id: ChatId,
    /// Inbound messages that reached this device.
    pub message_ids: Vec<MessageId>,
}

/// Body of [`RequestKind::MarkRead`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkReadRequest {
    /// Chat to mark read.
    pub chat_id: ChatId,
}

/// Body of [`RequestKind::Unsend`] and [`RequestKind::DeleteForMe`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRefsRequest {
    /// Chat the messages belong to.
    pub chat_id: ChatId,
    /// Messages to act on.
    pub message_ids: Vec<MessageId>,
}

/// Generic acknowledgement body returned by state-changing requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OkResponse {
    /// Whether the server applied the request.
    #[serde(default)]
    pub ok: bool,
}

/// One server-recorded action waiting to be replayed by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncAction {
    /// Cursor id of this action.
    pub action_id: String,
    /// Event type the action replays (e.g. `new_message`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Event payload.
    #[serde(default)]
    pub payload: Value,
}

impl SyncAction {
    /// Parses the replayed event.
    ///
    /// # Errors
    ///
    /// See [`ServerEvent::parse`].
    pub fn to_event(&self) -> Result<Option<ServerEvent>, EventError> {
        ServerEvent::parse(&self.kind, &self.payload)
    }
}

/// Response to [`RequestKind::FetchSyncActions`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchSyncActionsResponse {
    /// Outstanding actions, oldest first.
    #[serde(default)]
    pub actions: Vec<SyncAction>,
}

/// Body of [`RequestKind::AckSyncActions`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckSyncActionsRequest {
    /// Action ids that were applied locally.
    pub action_ids: Vec<String>,
}

/// Body of [`RequestKind::FetchMessages`].
///
/// `offset` counts messages already loaded, from the newest end; the page
/// returned is the `limit` messages just older than those, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchMessagesRequest {
    /// Chat to page through.
    pub chat_id: ChatId,
    /// Messages already loaded.
    #[serde(default)]
    pub offset: usize,
    /// Page size.
    pub limit: usize,
}

/// Response to [`RequestKind::ListChats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatListResponse {
    /// Chat-list entries.
    #[serde(default)]
    pub chats: Vec<ChatSummary>,
}

/// Response to [`RequestKind::FetchMessages`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePageResponse {
    /// Page of messages, oldest first.
    #[serde(default)]
    pub messages: Vec<Message>,
}
