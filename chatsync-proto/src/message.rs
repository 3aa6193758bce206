//! Data model shared by the client and the backend.
//!
//! Every type here is the on-the-wire JSON shape of a message or chat-list
//! entry. Identifiers are opaque strings assigned by the server, except for
//! temporary ids minted by the client for optimistic echoes.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum allowed text content size in bytes (64 KB).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Prefix carried by every client-generated temporary message id.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Identifier of a message, unique within its chat.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Wraps a server-assigned identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mints a fresh temporary id for an optimistic echo (UUID v7 based).
    #[must_use]
    pub fn temporary() -> Self {
        Self(format!("{TEMP_ID_PREFIX}{}", Uuid::now_v7()))
    }

    /// Returns `true` if this id was minted locally and has no server counterpart yet.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_ID_PREFIX)
    }

    /// Returns the string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identifier of a one-to-one chat.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(String);

impl ChatId {
    /// Wraps a server-assigned chat identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChatId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identifier of a user account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wraps a user identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A UTC instant, serialized as RFC 3339.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    ///
    /// Out-of-range values clamp to the epoch.
    #[must_use]
    pub fn from_millis(millis: i64) -> Self {
        Self(
            Utc.timestamp_millis_opt(millis)
                .single()
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        )
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub fn as_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Returns the inner `chrono` value.
    #[must_use]
    pub const fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Adds a tolerance window, saturating at the maximum representable instant.
    #[must_use]
    pub fn saturating_add(self, tolerance: Duration) -> Self {
        chrono::Duration::from_std(tolerance)
            .ok()
            .and_then(|d| self.0.checked_add_signed(d))
            .map_or(Self(DateTime::<Utc>::MAX_UTC), Self)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

/// Kind of content carried by a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Plain text.
    #[default]
    Text,
    /// Image attachment.
    Image,
    /// Video attachment.
    Video,
    /// Audio attachment.
    Audio,
    /// Generic file attachment.
    File,
    /// Tombstone left behind by an unsend.
    Unsent,
}

/// Delivery lifecycle of a message.
///
/// The derived ordering is the lifecycle order, so `max` is the merge
/// operator for two observations of the same message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Created locally, not yet confirmed by the server.
    Pending,
    /// Confirmed by the server.
    Sent,
    /// Delivered to the recipient's device.
    Delivered,
    /// Read by the recipient.
    Read,
}

impl MessageStatus {
    /// Status assumed for anything arriving over the wire without one.
    #[must_use]
    pub const fn wire_default() -> Self {
        Self::Sent
    }
}

/// Attachment metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    /// Download URL.
    pub url: String,
    /// Original file name.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// MIME type.
    pub mime: String,
    /// Upload progress percentage while an upload is in flight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_progress: Option<u8>,
}

/// A chat message as exchanged on the wire and held in the local ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message id (temporary for optimistic echoes).
    pub id: MessageId,
    /// Chat the message belongs to.
    pub chat_id: ChatId,
    /// Author.
    pub sender_id: UserId,
    /// Addressee.
    pub recipient_id: UserId,
    /// Text content (empty for tombstones and bare attachments).
    #[serde(default)]
    pub content: String,
    /// Content kind.
    #[serde(rename = "type", default)]
    pub message_type: MessageType,
    /// Creation instant.
    pub created_at: Timestamp,
    /// Stored delivery status.
    #[serde(default = "MessageStatus::wire_default")]
    pub status: MessageStatus,
    /// Whether the message is known to have reached its recipient.
    ///
    /// Set by the server or by [`Message::advance_status`]. Delivery
    /// derived from chat horizons is not stored here; consumers that hold
    /// horizon state raise it on the copies they hand out.
    #[serde(default)]
    pub delivered_to_recipient: bool,
    /// Optional attachment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileMeta>,
    /// Client temporary key echoed back by the server for reconciliation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<MessageId>,
}

impl Message {
    /// Builds an optimistic text message with a fresh temporary id and `Pending` status.
    #[must_use]
    pub fn optimistic(chat_id: ChatId, sender_id: UserId, recipient_id: UserId, text: &str) -> Self {
        let id = MessageId::temporary();
        Self {
            temp_id: Some(id.clone()),
            id,
            chat_id,
            sender_id,
            recipient_id,
            content: text.to_string(),
            message_type: MessageType::Text,
            created_at: Timestamp::now(),
            status: MessageStatus::Pending,
            delivered_to_recipient: false,
            file: None,
        }
    }

    /// Returns `true` once the message has been unsent.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.message_type == MessageType::Unsent
    }

    /// Returns `true` if the message was written by someone other than `me`.
    #[must_use]
    pub fn is_inbound_for(&self, me: &UserId) -> bool {
        self.sender_id != *me
    }

    /// Moves the stored status forward.
    ///
    /// Returns `false` (and changes nothing) when `next` is not strictly
    /// later in the lifecycle or the message is a tombstone.
    pub fn advance_status(&mut self, next: MessageStatus) -> bool {
        if self.is_tombstone() || next <= self.status {
            return false;
        }
        self.status = next;
        if next >= MessageStatus::Delivered {
            self.delivered_to_recipient = true;
        }
        true
    }

    /// Turns this message into an "unsent" tombstone.
    ///
    /// Returns `false` if it already was one.
    pub fn tombstone(&mut self) -> bool {
        if self.is_tombstone() {
            return false;
        }
        self.message_type = MessageType::Unsent;
        self.content.clear();
        self.file = None;
        true
    }
}

/// Error returned when outbound text fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Message content is empty.
    #[error("message content is empty")]
    Empty,
    /// Message content exceeds the maximum allowed size.
    #[error("message too large ({size} bytes, max {max} bytes)")]
    TooLarge {
        /// Actual size of the content in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
}

/// Validates outbound text: non-empty (after trimming) and within [`MAX_MESSAGE_SIZE`].
///
/// # Errors
///
/// Returns [`ValidationError::Empty`] or [`ValidationError::TooLarge`].
pub fn validate_text(text: &str) -> Result<(), ValidationError> {
    if text.trim().is_empty() {
        return Err(ValidationError::Empty);
    }
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ValidationError::TooLarge {
            size: text.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(())
}

/// Chat-list entry with denormalized preview fields and read/delivery horizons.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSummary {
    /// Chat id.
    pub chat_id: ChatId,
    /// The other participant.
    pub other_user_id: UserId,
    /// Id of the message shown as preview.
    #[serde(default)]
    pub last_message_id: Option<MessageId>,
    /// Preview text.
    #[serde(default)]
    pub last_message_content: Option<String>,
    /// Preview content kind.
    #[serde(default)]
    pub last_message_type: Option<MessageType>,
    /// Preview timestamp.
    #[serde(default)]
    pub last_message_at: Option<Timestamp>,
    /// Preview author.
    #[serde(default)]
    pub last_message_sender_id: Option<UserId>,
    /// Unread inbound messages.
    #[serde(default)]
    pub unread_count: u32,
    /// Latest instant up to which the other user has read.
    #[serde(default)]
    pub other_user_last_read_at: Option<Timestamp>,
    /// Latest instant up to which messages reached the other user.
    #[serde(default)]
    pub other_user_last_delivered_at: Option<Timestamp>,
    /// Whether messaging is currently allowed in this chat.
    #[serde(default = "default_eligible")]
    pub eligible: bool,
}

const fn default_eligible() -> bool {
    true
}

impl ChatSummary {
    /// Creates an empty entry for a chat seen for the first time.
    #[must_use]
    pub const fn new(chat_id: ChatId, other_user_id: UserId) -> Self {
        Self {
            chat_id,
            other_user_id,
            last_message_id: None,
            last_message_content: None,
            last_message_type: None,
            last_message_at: None,
            last_message_sender_id: None,
            unread_count: 0,
            other_user_last_read_at: None,
            other_user_last_delivered_at: None,
            eligible: true,
        }
    }

    /// Overwrites the preview fields with `msg`.
    pub fn set_preview(&mut self, msg: &Message) {
        self.last_message_id = Some(msg.id.clone());
        self.last_message_content = Some(msg.content.clone());
        self.last_message_type = Some(msg.message_type);
        self.last_message_at = Some(msg.created_at);
        self.last_message_sender_id = Some(msg.sender_id.clone());
    }

    /// Clears every preview field.
    pub fn clear_preview(&mut self) {
        self.last_message_id = None;
        self.last_message_content = None;
        self.last_message_type = None;
        self.last_message_at = None;
        self.last_message_sender_id = None;
    }

    /// Returns `true` if the preview currently shows `id`.
    #[must_use]
    pub fn preview_is(&self, id: &MessageId) -> bool {
        self.last_message_id.as_ref() == Some(id)
    }

    /// Moves the read horizon forward; never backward.
    ///
    /// Returns `true` if the horizon changed.
    pub fn advance_read_horizon(&mut self, at: Timestamp) -> bool {
        advance(&mut self.other_user_last_read_at, at)
    }

    /// Moves the delivery horizon forward; never backward.
    ///
    /// Returns `true` if the horizon changed.
    pub fn advance_delivered_horizon(&mut self, at: Timestamp) -> bool {
        advance(&mut self.other_user_last_delivered_at, at)
    }

    /// Effective delivery horizon: read implies delivered.
    #[must_use]
    pub fn effective_delivered_horizon(&self) -> Option<Timestamp> {
        match (self.other_user_last_delivered_at, self.other_user_last_read_at) {
            (Some(d), Some(r)) => Some(d.max(r)),
            (d, r) => d.or(r),
        }
    }
}

fn advance(slot: &mut Option<Timestamp>, at: Timestamp) -> bool {
    match slot {
        Some(current) if *current >= at => false,
        _ => {
            *slot = Some(at);
            true
        }
    }
}
