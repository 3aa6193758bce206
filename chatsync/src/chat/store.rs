//! Conversation store: chat-list projection plus per-chat ledgers.
//!
//! The store is the single owner of local conversation state. It is
//! mutated only by the event router and by the client's intents, and it
//! announces every change on a broadcast channel of [`StoreEvent`]s so a
//! UI can re-render without polling.
//!
//! Delivery and read state of outbound messages is derived from the chat's
//! horizon timestamps (see [`ConversationStore::status_of`]) rather than
//! stored per message.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use tokio::sync::broadcast;

use chatsync_proto::message::{
    ChatId, ChatSummary, Message, MessageId, MessageStatus, Timestamp, UserId,
};

use super::ledger::ChatLedger;
use crate::config::SyncConfig;

/// Change notification for UI subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// The ledger (or derived statuses) of a chat changed.
    MessagesChanged {
        /// Affected chat.
        chat_id: ChatId,
    },
    /// The chat list changed (previews, unread counts, horizons, order).
    ChatListChanged,
    /// An optimistic send was reverted; its text is back in the draft.
    SendFailed {
        /// Chat the message was sent to.
        chat_id: ChatId,
        /// Temporary id of the reverted entry.
        temp_id: MessageId,
        /// Human-readable failure reason.
        reason: String,
    },
    /// Selection mode or the selected set changed.
    SelectionChanged,
}

/// Ids remembered per chat for replay detection.
const MAX_TRACKED_IDS_PER_CHAT: usize = 1024;

/// Bounded id set that forgets its oldest entry first.
#[derive(Debug, Default)]
struct RecentIds {
    order: VecDeque<MessageId>,
    ids: HashSet<MessageId>,
}

impl RecentIds {
    fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    /// Returns `false` if `id` was already present.
    fn insert(&mut self, id: &MessageId) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() >= MAX_TRACKED_IDS_PER_CHAT
            && let Some(oldest) = self.order.pop_front()
        {
            self.ids.remove(&oldest);
        }
        self.order.push_back(id.clone());
        self.ids.insert(id.clone());
        true
    }
}

/// Per-chat bookkeeping that keeps `new_message` replays from being
/// applied twice.
#[derive(Debug, Default)]
struct ChatMemo {
    /// Ids already applied to the chat-list entry.
    applied: RecentIds,
    /// Unsent or deleted ids. A replay of one of these is ignored.
    retired: RecentIds,
    /// Newest instant already covered by a server-supplied unread count.
    counted_through: Option<Timestamp>,
}

/// Horizons that arrived before their chat-list entry.
#[derive(Debug, Default, Clone, Copy)]
struct HeldHorizons {
    read: Option<Timestamp>,
    delivered: Option<Timestamp>,
}

impl HeldHorizons {
    fn apply(self, chat: &mut ChatSummary) {
        if let Some(read) = self.read {
            chat.advance_read_horizon(read);
            chat.advance_delivered_horizon(read);
        }
        if let Some(delivered) = self.delivered {
            chat.advance_delivered_horizon(delivered);
        }
    }
}

fn raise(slot: &mut Option<Timestamp>, at: Timestamp) {
    if slot.is_none_or(|current| current < at) {
        *slot = Some(at);
    }
}

fn copy_preview(chat: &mut ChatSummary, from: &ChatSummary) {
    chat.last_message_id.clone_from(&from.last_message_id);
    chat.last_message_content.clone_from(&from.last_message_content);
    chat.last_message_type = from.last_message_type;
    chat.last_message_at = from.last_message_at;
    chat.last_message_sender_id.clone_from(&from.last_message_sender_id);
}

/// Multi-select state for bulk operations on the open chat.
#[derive(Debug, Default)]
struct Selection {
    active: bool,
    ids: HashSet<MessageId>,
}

/// Local conversation state.
pub struct ConversationStore {
    me: UserId,
    tolerance: Duration,
    chats: HashMap<ChatId, ChatSummary>,
    ledgers: HashMap<ChatId, ChatLedger>,
    memos: HashMap<ChatId, ChatMemo>,
    held_horizons: HashMap<ChatId, HeldHorizons>,
    /// Chat-list entries as they were before an optimistic preview, keyed
    /// by temporary id.
    displaced: HashMap<MessageId, ChatSummary>,
    active: Option<ChatId>,
    selection: Selection,
    drafts: HashMap<ChatId, String>,
    events: broadcast::Sender<StoreEvent>,
}

impl ConversationStore {
    /// Create an empty store for `me`.
    #[must_use]
    pub fn new(me: UserId, config: &SyncConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            me,
            tolerance: config.horizon_tolerance,
            chats: HashMap::new(),
            ledgers: HashMap::new(),
            memos: HashMap::new(),
            held_horizons: HashMap::new(),
            displaced: HashMap::new(),
            active: None,
            selection: Selection::default(),
            drafts: HashMap::new(),
            events,
        }
    }

    /// Subscribe to change notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// The signed-in user.
    #[must_use]
    pub const fn me(&self) -> &UserId {
        &self.me
    }

    fn emit(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn messages_changed(&self, chat_id: &ChatId) {
        self.emit(StoreEvent::MessagesChanged {
            chat_id: chat_id.clone(),
        });
    }

    // -----------------------------------------------------------------------
    // Chat list
    // -----------------------------------------------------------------------

    /// Chat-list entry for `chat_id`.
    #[must_use]
    pub fn chat(&self, chat_id: &ChatId) -> Option<&ChatSummary> {
        self.chats.get(chat_id)
    }

    /// Chat list, most recent activity first. Chats with no messages sort last.
    #[must_use]
    pub fn chats(&self) -> Vec<ChatSummary> {
        let mut chats: Vec<ChatSummary> = self.chats.values().cloned().collect();
        chats.sort_by(|a, b| {
            b.last_message_at
                .cmp(&a.last_message_at)
                .then_with(|| a.chat_id.cmp(&b.chat_id))
        });
        chats
    }

    /// Entry for `chat_id`, synthesized on first sight.
    fn ensure_chat(&mut self, chat_id: &ChatId, other_user_id: &UserId) -> &mut ChatSummary {
        let held = &mut self.held_horizons;
        self.chats.entry(chat_id.clone()).or_insert_with(|| {
            tracing::debug!(chat_id = %chat_id, "synthesizing chat-list entry");
            let mut chat = ChatSummary::new(chat_id.clone(), other_user_id.clone());
            if let Some(horizons) = held.remove(chat_id) {
                horizons.apply(&mut chat);
            }
            chat
        })
    }

    /// Whether `id` was unsent or deleted in `chat_id`.
    #[must_use]
    pub fn is_retired(&self, chat_id: &ChatId, id: &MessageId) -> bool {
        self.memos.get(chat_id).is_some_and(|m| m.retired.contains(id))
            || self.message(chat_id, id).is_some_and(Message::is_tombstone)
    }

    fn retire(&mut self, chat_id: &ChatId, ids: &[MessageId]) {
        let memo = self.memos.entry(chat_id.clone()).or_default();
        for id in ids {
            memo.retired.insert(id);
        }
    }

    /// Replace the chat list with a fresh server copy.
    ///
    /// Horizons that are further ahead locally are kept; the open chat
    /// keeps a zero unread count.
    pub fn replace_chat_list(&mut self, fresh: Vec<ChatSummary>) {
        let mut next = HashMap::with_capacity(fresh.len());
        for mut chat in fresh {
            if let Some(old) = self.chats.get(&chat.chat_id) {
                if let Some(read) = old.other_user_last_read_at {
                    chat.advance_read_horizon(read);
                }
                if let Some(delivered) = old.other_user_last_delivered_at {
                    chat.advance_delivered_horizon(delivered);
                }
            }
            if let Some(horizons) = self.held_horizons.remove(&chat.chat_id) {
                horizons.apply(&mut chat);
            }
            if self.active.as_ref() == Some(&chat.chat_id) {
                chat.unread_count = 0;
            }
            let memo = self.memos.entry(chat.chat_id.clone()).or_default();
            if let Some(at) = chat.last_message_at {
                raise(&mut memo.counted_through, at);
            }
            if let Some(id) = &chat.last_message_id {
                memo.applied.insert(id);
            }
            next.insert(chat.chat_id.clone(), chat);
        }
        tracing::debug!(chats = next.len(), "chat list replaced");
        self.chats = next;
        self.emit(StoreEvent::ChatListChanged);
    }

    /// Put `msg` into the chat-list preview of its chat, creating the entry
    /// if needed. `count_unread` adds one to the unread counter.
    ///
    /// Each id is applied once: a replay changes neither the preview nor
    /// the counter, and neither does a message that was unsent or deleted.
    /// An older message never replaces a newer preview, and a message the
    /// last server chat list already counted is not counted again.
    pub fn upsert_preview(&mut self, msg: &Message, count_unread: bool) {
        if self.is_retired(&msg.chat_id, &msg.id) {
            tracing::debug!(chat_id = %msg.chat_id, message_id = %msg.id, "preview for retired message ignored");
            return;
        }
        let memo = self.memos.entry(msg.chat_id.clone()).or_default();
        if !memo.applied.insert(&msg.id) {
            return;
        }
        let counted = memo.counted_through.is_some_and(|at| msg.created_at <= at);
        let other = if msg.is_inbound_for(&self.me) {
            msg.sender_id.clone()
        } else {
            msg.recipient_id.clone()
        };
        let chat = self.ensure_chat(&msg.chat_id, &other);
        if chat.preview_is(&msg.id) {
            return;
        }
        let replaces_optimistic = msg.temp_id.as_ref().is_some_and(|t| chat.preview_is(t));
        if replaces_optimistic
            || chat
                .last_message_at
                .is_none_or(|current| current <= msg.created_at)
        {
            chat.set_preview(msg);
        }
        if count_unread && !counted {
            chat.unread_count = chat.unread_count.saturating_add(1);
        }
        self.emit(StoreEvent::ChatListChanged);
    }

    /// Clear the preview of `chat_id` if it shows any of `ids`.
    ///
    /// Returns `true` if it did.
    pub fn clear_preview_if_any(&mut self, chat_id: &ChatId, ids: &[MessageId]) -> bool {
        let Some(chat) = self.chats.get_mut(chat_id) else {
            return false;
        };
        if !ids.iter().any(|id| chat.preview_is(id)) {
            return false;
        }
        chat.clear_preview();
        self.emit(StoreEvent::ChatListChanged);
        true
    }

    /// Reset the unread counter of `chat_id`.
    pub fn reset_unread(&mut self, chat_id: &ChatId) {
        if let Some(chat) = self.chats.get_mut(chat_id)
            && chat.unread_count != 0
        {
            chat.unread_count = 0;
            self.emit(StoreEvent::ChatListChanged);
        }
    }

    /// Move the delivery horizon of `chat_id` forward.
    ///
    /// Returns `true` if it moved.
    pub fn advance_delivered_horizon(&mut self, chat_id: &ChatId, at: Timestamp) -> bool {
        let Some(chat) = self.chats.get_mut(chat_id) else {
            tracing::debug!(chat_id = %chat_id, "delivery horizon held until the chat is known");
            raise(&mut self.held_horizons.entry(chat_id.clone()).or_default().delivered, at);
            return false;
        };
        let moved = chat.advance_delivered_horizon(at);
        if moved {
            self.messages_changed(chat_id);
            self.emit(StoreEvent::ChatListChanged);
        }
        moved
    }

    /// Move the read horizon of `chat_id` forward. Read implies delivered,
    /// so the delivery horizon is advanced to the same instant.
    ///
    /// Returns `true` if either horizon moved.
    pub fn advance_read_horizon(&mut self, chat_id: &ChatId, at: Timestamp) -> bool {
        let Some(chat) = self.chats.get_mut(chat_id) else {
            tracing::debug!(chat_id = %chat_id, "read horizon held until the chat is known");
            raise(&mut self.held_horizons.entry(chat_id.clone()).or_default().read, at);
            return false;
        };
        let read = chat.advance_read_horizon(at);
        let delivered = chat.advance_delivered_horizon(at);
        if read || delivered {
            self.messages_changed(chat_id);
            self.emit(StoreEvent::ChatListChanged);
        }
        read || delivered
    }

    // -----------------------------------------------------------------------
    // Active chat and ledgers
    // -----------------------------------------------------------------------

    /// Make `chat_id` the open chat with an empty ledger ready for its
    /// first page. Resets its unread counter and any selection.
    pub fn open_chat(&mut self, chat_id: &ChatId) {
        self.active = Some(chat_id.clone());
        self.ledgers.insert(chat_id.clone(), ChatLedger::new());
        self.set_selection_mode(false);
        self.reset_unread(chat_id);
        self.messages_changed(chat_id);
    }

    /// Close the open chat, if any.
    pub fn close_chat(&mut self) {
        if self.active.take().is_some() {
            self.set_selection_mode(false);
        }
    }

    /// The open chat.
    #[must_use]
    pub const fn active_chat(&self) -> Option<&ChatId> {
        self.active.as_ref()
    }

    /// Whether `chat_id` is the open chat.
    #[must_use]
    pub fn is_active(&self, chat_id: &ChatId) -> bool {
        self.active.as_ref() == Some(chat_id)
    }

    /// Ledger of `chat_id`, if one is loaded.
    #[must_use]
    pub fn ledger(&self, chat_id: &ChatId) -> Option<&ChatLedger> {
        self.ledgers.get(chat_id)
    }

    /// Messages of `chat_id`, oldest first.
    ///
    /// `delivered_to_recipient` is raised on copies whose effective status
    /// (see [`Self::status_of`]) is at least delivered.
    #[must_use]
    pub fn messages(&self, chat_id: &ChatId) -> Vec<Message> {
        self.ledgers
            .get(chat_id)
            .map(|l| {
                l.iter()
                    .map(|m| {
                        let mut copy = m.clone();
                        if self.status_of(m) >= MessageStatus::Delivered {
                            copy.delivered_to_recipient = true;
                        }
                        copy
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Look a message up.
    #[must_use]
    pub fn message(&self, chat_id: &ChatId, id: &MessageId) -> Option<&Message> {
        self.ledgers.get(chat_id).and_then(|l| l.get(id))
    }

    /// Whether older pages of `chat_id` may exist.
    #[must_use]
    pub fn has_more(&self, chat_id: &ChatId) -> bool {
        self.ledgers.get(chat_id).is_none_or(ChatLedger::has_more)
    }

    /// Offset for the next backward page of `chat_id`.
    #[must_use]
    pub fn page_offset(&self, chat_id: &ChatId) -> usize {
        self.ledgers.get(chat_id).map_or(0, ChatLedger::server_count)
    }

    /// Merge a backward page into the ledger of `chat_id`.
    ///
    /// Returns the number of messages inserted.
    pub fn apply_page(&mut self, chat_id: &ChatId, page: Vec<Message>, requested: usize) -> usize {
        let inserted = self
            .ledgers
            .entry(chat_id.clone())
            .or_default()
            .apply_page(page, requested);
        self.messages_changed(chat_id);
        inserted
    }

    /// Insert an authoritative message into its chat's ledger.
    ///
    /// If the message echoes a temporary id still present in the ledger,
    /// the optimistic entry is replaced. Returns `false` when the message
    /// was already present (duplicate delivery) or was unsent or deleted.
    pub fn insert_message(&mut self, msg: Message) -> bool {
        if self.is_retired(&msg.chat_id, &msg.id) {
            return false;
        }
        let chat_id = msg.chat_id.clone();
        let ledger = self.ledgers.entry(chat_id.clone()).or_default();
        if ledger.contains(&msg.id) {
            if let Some(temp_id) = &msg.temp_id
                && ledger.remove(temp_id).is_some()
            {
                self.messages_changed(&chat_id);
            }
            return false;
        }
        match msg.temp_id.clone() {
            Some(temp_id) if ledger.contains(&temp_id) => ledger.replace(&temp_id, msg),
            _ => {
                ledger.insert(msg);
            }
        }
        self.messages_changed(&chat_id);
        true
    }

    /// Insert an optimistic outbound message and show it as the preview.
    pub fn insert_optimistic(&mut self, msg: Message) {
        debug_assert!(msg.id.is_temporary());
        if let Some(chat) = self.chats.get(&msg.chat_id)
            && chat.last_message_id.is_some()
        {
            self.displaced.insert(msg.id.clone(), chat.clone());
        }
        self.upsert_preview(&msg, false);
        let chat_id = msg.chat_id.clone();
        self.ledgers.entry(chat_id.clone()).or_default().insert(msg);
        self.messages_changed(&chat_id);
    }

    /// Replace the optimistic entry `temp_id` with the server's copy.
    pub fn confirm_optimistic(&mut self, temp_id: &MessageId, mut authoritative: Message) {
        let chat_id = authoritative.chat_id.clone();
        self.displaced.remove(temp_id);
        if authoritative.status < MessageStatus::Sent {
            authoritative.status = MessageStatus::Sent;
        }
        if let Some(chat) = self.chats.get_mut(&chat_id)
            && chat.preview_is(temp_id)
        {
            chat.set_preview(&authoritative);
            self.emit(StoreEvent::ChatListChanged);
        }
        self.ledgers
            .entry(chat_id.clone())
            .or_default()
            .replace(temp_id, authoritative);
        self.messages_changed(&chat_id);
    }

    /// Revert the optimistic entry `temp_id`: remove it, put `text` back in
    /// the chat's draft, and announce the failure.
    pub fn fail_optimistic(&mut self, chat_id: &ChatId, temp_id: &MessageId, text: &str, reason: &str) {
        if let Some(ledger) = self.ledgers.get_mut(chat_id) {
            ledger.remove(temp_id);
        }
        self.restore_preview(chat_id, temp_id);
        self.drafts.insert(chat_id.clone(), text.to_string());
        tracing::warn!(chat_id = %chat_id, temp_id = %temp_id, reason, "send failed, optimistic entry reverted");
        self.messages_changed(chat_id);
        self.emit(StoreEvent::SendFailed {
            chat_id: chat_id.clone(),
            temp_id: temp_id.clone(),
            reason: reason.to_string(),
        });
    }

    /// After removing `removed`, point the preview back at whichever is
    /// newer: the preview it displaced or the newest remaining ledger
    /// message. Clears it when neither exists.
    fn restore_preview(&mut self, chat_id: &ChatId, removed: &MessageId) {
        let displaced = self.displaced.remove(removed).filter(|prev| {
            prev.last_message_id
                .as_ref()
                .is_some_and(|id| !self.is_retired(chat_id, id))
        });
        let newest = self
            .ledgers
            .get(chat_id)
            .and_then(ChatLedger::newest)
            .filter(|m| m.id != *removed)
            .cloned();
        let Some(chat) = self.chats.get_mut(chat_id) else {
            return;
        };
        if !chat.preview_is(removed) {
            return;
        }
        match (newest, displaced) {
            (Some(msg), Some(prev)) if prev.last_message_at.is_some_and(|at| at > msg.created_at) => {
                copy_preview(chat, &prev);
            }
            (Some(msg), _) => chat.set_preview(&msg),
            (None, Some(prev)) => copy_preview(chat, &prev),
            (None, None) => chat.clear_preview(),
        }
        self.emit(StoreEvent::ChatListChanged);
    }

    /// Remove messages entirely (delete-for-me). Clears the preview if it
    /// showed one of them.
    ///
    /// Returns the number of messages removed from the ledger.
    pub fn remove_messages(&mut self, chat_id: &ChatId, ids: &[MessageId]) -> usize {
        self.retire(chat_id, ids);
        let removed = self
            .ledgers
            .get_mut(chat_id)
            .map_or(0, |l| ids.iter().filter(|id| l.remove(id).is_some()).count());
        self.clear_preview_if_any(chat_id, ids);
        if removed > 0 {
            self.messages_changed(chat_id);
        }
        self.selection.ids.retain(|id| !ids.contains(id));
        removed
    }

    /// Turn messages into "unsent" tombstones. Clears the preview if it
    /// showed one of them.
    ///
    /// Returns the number of messages newly tombstoned.
    pub fn tombstone_messages(&mut self, chat_id: &ChatId, ids: &[MessageId]) -> usize {
        self.retire(chat_id, ids);
        let changed = self.ledgers.get_mut(chat_id).map_or(0, |l| {
            ids.iter()
                .filter(|id| l.get_mut(id).is_some_and(Message::tombstone))
                .count()
        });
        self.clear_preview_if_any(chat_id, ids);
        if changed > 0 {
            self.messages_changed(chat_id);
        }
        changed
    }

    /// Mark individual outbound messages delivered (acks that carry no horizon).
    ///
    /// Returns the number of messages whose stored status advanced.
    pub fn mark_delivered(&mut self, chat_id: &ChatId, ids: &[MessageId]) -> usize {
        let changed = self.ledgers.get_mut(chat_id).map_or(0, |l| {
            ids.iter()
                .filter(|id| {
                    l.get_mut(id)
                        .is_some_and(|m| m.status >= MessageStatus::Sent && m.advance_status(MessageStatus::Delivered))
                })
                .count()
        });
        if changed > 0 {
            self.messages_changed(chat_id);
        }
        changed
    }

    /// Effective status of `msg`.
    ///
    /// For outbound messages this is the stored status raised by the chat's
    /// horizons: read if `created_at <= read_at + tolerance`, else delivered
    /// if `created_at <= delivered_at + tolerance`. Pending messages are
    /// never promoted, statuses never go below what is stored, and inbound
    /// messages and tombstones report their stored status.
    #[must_use]
    pub fn status_of(&self, msg: &Message) -> MessageStatus {
        if msg.is_tombstone() || msg.is_inbound_for(&self.me) || msg.status == MessageStatus::Pending
        {
            return msg.status;
        }
        let Some(chat) = self.chats.get(&msg.chat_id) else {
            return msg.status;
        };
        let within = |horizon: Option<Timestamp>| {
            horizon.is_some_and(|h| msg.created_at <= h.saturating_add(self.tolerance))
        };
        let derived = if within(chat.other_user_last_read_at) {
            MessageStatus::Read
        } else if within(chat.effective_delivered_horizon()) {
            MessageStatus::Delivered
        } else {
            MessageStatus::Sent
        };
        msg.status.max(derived)
    }

    // -----------------------------------------------------------------------
    // Drafts
    // -----------------------------------------------------------------------

    /// Composer text for `chat_id`.
    #[must_use]
    pub fn draft(&self, chat_id: &ChatId) -> Option<&str> {
        self.drafts.get(chat_id).map(String::as_str)
    }

    /// Replace the composer text for `chat_id`.
    pub fn set_draft(&mut self, chat_id: &ChatId, text: impl Into<String>) {
        self.drafts.insert(chat_id.clone(), text.into());
    }

    /// Take the composer text for `chat_id`, leaving it empty.
    pub fn take_draft(&mut self, chat_id: &ChatId) -> Option<String> {
        self.drafts.remove(chat_id)
    }

    // -----------------------------------------------------------------------
    // Selection
    // -----------------------------------------------------------------------

    /// Whether selection mode is on.
    #[must_use]
    pub const fn selection_mode(&self) -> bool {
        self.selection.active
    }

    /// Turn selection mode on or off. Turning it off clears the selection.
    pub fn set_selection_mode(&mut self, on: bool) {
        if self.selection.active == on {
            return;
        }
        self.selection.active = on;
        if !on {
            self.selection.ids.clear();
        }
        self.emit(StoreEvent::SelectionChanged);
    }

    /// Toggle `id` in the selection. Ignored outside selection mode or for
    /// messages not in the open chat.
    ///
    /// Returns whether `id` is selected afterwards.
    pub fn toggle_selected(&mut self, id: &MessageId) -> bool {
        if !self.selection.active {
            return false;
        }
        let in_open_chat = self
            .active
            .as_ref()
            .and_then(|c| self.ledgers.get(c))
            .is_some_and(|l| l.contains(id));
        if !in_open_chat {
            return false;
        }
        let selected = if self.selection.ids.remove(id) {
            false
        } else {
            self.selection.ids.insert(id.clone());
            true
        };
        self.emit(StoreEvent::SelectionChanged);
        selected
    }

    /// The selected ids, in ledger order.
    #[must_use]
    pub fn selected(&self) -> Vec<MessageId> {
        self.active
            .as_ref()
            .and_then(|c| self.ledgers.get(c))
            .map(|l| {
                l.iter()
                    .filter(|m| self.selection.ids.contains(&m.id))
                    .map(|m| m.id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}
