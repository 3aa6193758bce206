//! In-memory chat data for the reference backend.
//!
//! The [`ChatStore`] holds users, one-to-one chats with their messages and
//! per-participant read/delivery horizons, and per-user queues of sync
//! actions recorded while a user had no live connection. Operations return
//! the event payloads the server should fan out; delivery is the caller's
//! concern.

use std::collections::{HashMap, HashSet, VecDeque};

use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use chatsync_proto::codec::WireError;
use chatsync_proto::event::{DeliveryAckPayload, MessageRefsPayload, ReadReceiptPayload};
use chatsync_proto::message::{
    ChatId, ChatSummary, Message, MessageId, MessageStatus, Timestamp, UserId, validate_text,
};
use chatsync_proto::request::{
    AckDeliveryRequest, FetchMessagesRequest, MessageRefsRequest, SendMessageRequest, SyncAction,
};

/// Default maximum number of queued sync actions per user before FIFO eviction.
const DEFAULT_MAX_PENDING_ACTIONS: usize = 1000;

/// Wire error codes.
pub mod code {
    /// Malformed or invalid request.
    pub const BAD_REQUEST: &str = "bad_request";
    /// Missing or unknown credentials.
    pub const UNAUTHORIZED: &str = "unauthorized";
    /// The caller may not act on the target.
    pub const FORBIDDEN: &str = "forbidden";
    /// The target does not exist.
    pub const NOT_FOUND: &str = "not_found";
}

fn not_found(what: &str) -> WireError {
    WireError::new(code::NOT_FOUND, format!("{what} not found"))
}

/// One chat and everything recorded about it.
struct ChatRecord {
    participants: [UserId; 2],
    messages: Vec<Message>,
    hidden: HashMap<UserId, HashSet<MessageId>>,
    read_at: HashMap<UserId, Timestamp>,
    delivered_at: HashMap<UserId, Timestamp>,
}

impl ChatRecord {
    fn other(&self, user: &UserId) -> Option<&UserId> {
        match &self.participants {
            [a, b] if a == user => Some(b),
            [a, b] if b == user => Some(a),
            _ => None,
        }
    }

    fn visible_to<'a>(&'a self, user: &'a UserId) -> impl Iterator<Item = &'a Message> + 'a {
        let hidden = self.hidden.get(user);
        self.messages
            .iter()
            .filter(move |m| hidden.is_none_or(|h| !h.contains(&m.id)))
    }
}

#[derive(Default)]
struct StoreData {
    users_by_token: HashMap<String, UserId>,
    chats: HashMap<ChatId, ChatRecord>,
    sent_by_temp_id: HashMap<(UserId, MessageId), (ChatId, MessageId)>,
    actions: HashMap<UserId, VecDeque<SyncAction>>,
    last_created_at: Option<Timestamp>,
}

impl StoreData {
    fn chat_for(&self, user: &UserId, chat_id: &ChatId) -> Result<&ChatRecord, WireError> {
        let chat = self.chats.get(chat_id).ok_or_else(|| not_found("chat"))?;
        if chat.other(user).is_none() {
            return Err(WireError::new(code::FORBIDDEN, "not a participant"));
        }
        Ok(chat)
    }

    fn chat_for_mut(&mut self, user: &UserId, chat_id: &ChatId) -> Result<&mut ChatRecord, WireError> {
        let chat = self.chats.get_mut(chat_id).ok_or_else(|| not_found("chat"))?;
        if chat.other(user).is_none() {
            return Err(WireError::new(code::FORBIDDEN, "not a participant"));
        }
        Ok(chat)
    }

    fn find_chat(&self, a: &UserId, b: &UserId) -> Option<ChatId> {
        self.chats
            .iter()
            .find(|(_, c)| c.other(a) == Some(b))
            .map(|(id, _)| id.clone())
    }

    fn ensure_chat(&mut self, a: &UserId, b: &UserId) -> ChatId {
        if let Some(id) = self.find_chat(a, b) {
            return id;
        }
        let id = ChatId::new(format!("chat-{}", Uuid::now_v7()));
        self.chats.insert(
            id.clone(),
            ChatRecord {
                participants: [a.clone(), b.clone()],
                messages: Vec::new(),
                hidden: HashMap::new(),
                read_at: HashMap::new(),
                delivered_at: HashMap::new(),
            },
        );
        id
    }

    /// Strictly increasing creation instants, so horizons are unambiguous.
    fn next_created_at(&mut self) -> Timestamp {
        let now = Timestamp::now();
        let next = match self.last_created_at {
            Some(last) if now <= last => Timestamp::from_millis(last.as_millis() + 1),
            _ => now,
        };
        self.last_created_at = Some(next);
        next
    }

    fn summary_for(&self, user: &UserId, chat_id: &ChatId, chat: &ChatRecord) -> Option<ChatSummary> {
        let other = chat.other(user)?;
        let mut summary = ChatSummary::new(chat_id.clone(), other.clone());
        if let Some(last) = chat.visible_to(user).filter(|m| !m.is_tombstone()).last() {
            summary.set_preview(last);
        }
        let read_at = chat.read_at.get(user).copied();
        let unread = chat
            .visible_to(user)
            .filter(|m| m.recipient_id == *user && !m.is_tombstone())
            .filter(|m| read_at.is_none_or(|r| m.created_at > r))
            .count();
        summary.unread_count = u32::try_from(unread).unwrap_or(u32::MAX);
        summary.other_user_last_read_at = chat.read_at.get(other).copied();
        summary.other_user_last_delivered_at = chat.delivered_at.get(other).copied();
        Some(summary)
    }
}

/// Thread-safe in-memory backend data.
pub struct ChatStore {
    data: RwLock<StoreData>,
    max_pending_actions: usize,
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatStore {
    /// Creates an empty store with the default action queue limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_pending_actions(DEFAULT_MAX_PENDING_ACTIONS)
    }

    /// Creates an empty store with a custom per-user action queue limit.
    #[must_use]
    pub fn with_max_pending_actions(max_pending_actions: usize) -> Self {
        Self {
            data: RwLock::new(StoreData::default()),
            max_pending_actions: max_pending_actions.max(1),
        }
    }

    /// Registers `user` with the bearer/session `token`.
    pub async fn add_user(&self, user: &UserId, token: &str) {
        self.data
            .write()
            .await
            .users_by_token
            .insert(token.to_string(), user.clone());
    }

    /// Resolves a token to its user.
    pub async fn authenticate(&self, token: &str) -> Option<UserId> {
        self.data.read().await.users_by_token.get(token).cloned()
    }

    /// Returns the chat between `a` and `b`, creating it if needed.
    pub async fn create_chat(&self, a: &UserId, b: &UserId) -> ChatId {
        self.data.write().await.ensure_chat(a, b)
    }

    /// Both participants of `chat_id`.
    pub async fn participants(&self, chat_id: &ChatId) -> Option<[UserId; 2]> {
        self.data
            .read()
            .await
            .chats
            .get(chat_id)
            .map(|c| c.participants.clone())
    }

    /// Records a message from `sender`.
    ///
    /// A repeated request with the same `temp_id` returns the message
    /// recorded the first time, with `false` as the second element.
    ///
    /// # Errors
    ///
    /// `bad_request` for invalid text or a self-addressed message,
    /// `not_found`/`forbidden` for an unknown chat or a non-participant.
    pub async fn send_message(
        &self,
        sender: &UserId,
        request: SendMessageRequest,
    ) -> Result<(Message, bool), WireError> {
        let mut data = self.data.write().await;
        let key = (sender.clone(), request.temp_id.clone());
        if let Some((chat_id, id)) = data.sent_by_temp_id.get(&key)
            && let Some(existing) = data
                .chats
                .get(chat_id)
                .and_then(|c| c.messages.iter().find(|m| &m.id == id))
        {
            tracing::debug!(sender = %sender, temp_id = %request.temp_id, "duplicate send, returning recorded message");
            return Ok((existing.clone(), false));
        }

        if request.file.is_none() {
            validate_text(&request.content)
                .map_err(|e| WireError::new(code::BAD_REQUEST, e.to_string()))?;
        }
        if request.recipient_id == *sender {
            return Err(WireError::new(code::BAD_REQUEST, "cannot message yourself"));
        }
        let chat_id = match request.chat_id {
            Some(chat_id) => {
                let chat = data.chat_for(sender, &chat_id)?;
                if chat.other(sender) != Some(&request.recipient_id) {
                    return Err(WireError::new(code::BAD_REQUEST, "recipient is not in this chat"));
                }
                chat_id
            }
            None => data.ensure_chat(sender, &request.recipient_id),
        };

        let message = Message {
            id: MessageId::new(format!("msg-{}", Uuid::now_v7())),
            chat_id: chat_id.clone(),
            sender_id: sender.clone(),
            recipient_id: request.recipient_id,
            content: request.content,
            message_type: request.message_type,
            created_at: data.next_created_at(),
            status: MessageStatus::Sent,
            delivered_to_recipient: false,
            file: request.file,
            temp_id: Some(request.temp_id),
        };
        data.sent_by_temp_id
            .insert(key, (chat_id.clone(), message.id.clone()));
        data.chat_for_mut(sender, &chat_id)?
            .messages
            .push(message.clone());
        Ok((message, true))
    }

    /// Records that `user` received the given messages.
    ///
    /// The delivery horizon becomes the newest acknowledged creation
    /// instant. Returns `None` when none of the ids are messages addressed
    /// to `user`.
    ///
    /// # Errors
    ///
    /// `not_found`/`forbidden` for an unknown chat or a non-participant.
    pub async fn ack_delivery(
        &self,
        user: &UserId,
        request: &AckDeliveryRequest,
    ) -> Result<Option<DeliveryAckPayload>, WireError> {
        let mut data = self.data.write().await;
        let chat = data.chat_for_mut(user, &request.chat_id)?;
        let mut acked = Vec::new();
        let mut horizon: Option<Timestamp> = None;
        for msg in &mut chat.messages {
            if msg.recipient_id == *user && request.message_ids.contains(&msg.id) {
                msg.advance_status(MessageStatus::Delivered);
                horizon = horizon.max(Some(msg.created_at));
                acked.push(msg.id.clone());
            }
        }
        let Some(at) = horizon else {
            return Ok(None);
        };
        let slot = chat.delivered_at.entry(user.clone()).or_insert(at);
        *slot = (*slot).max(at);
        Ok(Some(DeliveryAckPayload {
            chat_id: request.chat_id.clone(),
            message_id: None,
            message_ids: acked,
            delivered_at: Some(*slot),
            recipient_id: Some(user.clone()),
        }))
    }

    /// Marks `chat_id` read by `user` up to now.
    ///
    /// # Errors
    ///
    /// `not_found`/`forbidden` for an unknown chat or a non-participant.
    pub async fn mark_read(
        &self,
        user: &UserId,
        chat_id: &ChatId,
    ) -> Result<ReadReceiptPayload, WireError> {
        let mut data = self.data.write().await;
        let now = Timestamp::now();
        let read_at = data.last_created_at.map_or(now, |last| last.max(now));
        let chat = data.chat_for_mut(user, chat_id)?;
        for msg in &mut chat.messages {
            if msg.recipient_id == *user && msg.created_at <= read_at {
                msg.advance_status(MessageStatus::Read);
            }
        }
        chat.read_at.insert(user.clone(), read_at);
        let delivered = chat.delivered_at.entry(user.clone()).or_insert(read_at);
        *delivered = (*delivered).max(read_at);
        Ok(ReadReceiptPayload {
            chat_id: chat_id.clone(),
            read_at,
            reader_id: Some(user.clone()),
        })
    }

    /// Tombstones messages authored by `user`.
    ///
    /// # Errors
    ///
    /// `forbidden` if any id belongs to someone else, `not_found` if an id
    /// is unknown or the chat does not exist.
    pub async fn unsend(
        &self,
        user: &UserId,
        request: &MessageRefsRequest,
    ) -> Result<MessageRefsPayload, WireError> {
        let mut data = self.data.write().await;
        let chat = data.chat_for_mut(user, &request.chat_id)?;
        for id in &request.message_ids {
            let msg = chat
                .messages
                .iter()
                .find(|m| &m.id == id)
                .ok_or_else(|| not_found("message"))?;
            if msg.sender_id != *user {
                return Err(WireError::new(code::FORBIDDEN, "only the author can unsend"));
            }
        }
        for msg in &mut chat.messages {
            if request.message_ids.contains(&msg.id) {
                msg.tombstone();
            }
        }
        Ok(MessageRefsPayload {
            chat_id: request.chat_id.clone(),
            message_id: None,
            message_ids: request.message_ids.clone(),
        })
    }

    /// Hides messages from `user` only.
    ///
    /// # Errors
    ///
    /// `not_found`/`forbidden` for an unknown chat or a non-participant.
    pub async fn delete_for_me(
        &self,
        user: &UserId,
        request: &MessageRefsRequest,
    ) -> Result<MessageRefsPayload, WireError> {
        let mut data = self.data.write().await;
        let chat = data.chat_for_mut(user, &request.chat_id)?;
        chat.hidden
            .entry(user.clone())
            .or_default()
            .extend(request.message_ids.iter().cloned());
        Ok(MessageRefsPayload {
            chat_id: request.chat_id.clone(),
            message_id: None,
            message_ids: request.message_ids.clone(),
        })
    }

    /// Chat list of `user`, most recent activity first.
    pub async fn list_chats(&self, user: &UserId) -> Vec<ChatSummary> {
        let data = self.data.read().await;
        let mut chats: Vec<ChatSummary> = data
            .chats
            .iter()
            .filter_map(|(id, chat)| data.summary_for(user, id, chat))
            .collect();
        chats.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        chats
    }

    /// One page of history, oldest first. `offset` counts back from the
    /// newest message.
    ///
    /// # Errors
    ///
    /// `not_found`/`forbidden` for an unknown chat or a non-participant.
    pub async fn fetch_messages(
        &self,
        user: &UserId,
        request: &FetchMessagesRequest,
    ) -> Result<Vec<Message>, WireError> {
        let data = self.data.read().await;
        let chat = data.chat_for(user, &request.chat_id)?;
        let visible: Vec<&Message> = chat.visible_to(user).collect();
        let end = visible.len().saturating_sub(request.offset);
        let start = end.saturating_sub(request.limit);
        Ok(visible[start..end].iter().map(|m| (*m).clone()).collect())
    }

    /// Queues an action for `user`, returning the queue length.
    ///
    /// When the queue exceeds the configured maximum, the oldest action is
    /// evicted (FIFO).
    pub async fn enqueue_action(&self, user: &UserId, kind: &str, payload: Value) -> usize {
        let mut data = self.data.write().await;
        let queue = data.actions.entry(user.clone()).or_default();
        queue.push_back(SyncAction {
            action_id: format!("act-{}", Uuid::now_v7()),
            kind: kind.to_string(),
            payload,
        });
        if queue.len() > self.max_pending_actions {
            queue.pop_front();
        }
        queue.len()
    }

    /// Outstanding actions for `user`, oldest first.
    pub async fn pending_actions(&self, user: &UserId) -> Vec<SyncAction> {
        self.data
            .read()
            .await
            .actions
            .get(user)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drops acknowledged actions, returning how many were removed.
    pub async fn ack_actions(&self, user: &UserId, action_ids: &[String]) -> usize {
        let mut data = self.data.write().await;
        let Some(queue) = data.actions.get_mut(user) else {
            return 0;
        };
        let before = queue.len();
        queue.retain(|a| !action_ids.contains(&a.action_id));
        before - queue.len()
    }
}
