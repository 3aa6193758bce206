//! Per-chat message ledger.
//!
//! Messages are kept oldest-first in an id sequence, with an id→message map
//! alongside for constant-time lookup. Inserts place a message by its
//! `created_at`, so pages arriving out of order still produce a sorted
//! ledger, and duplicate ids are rejected.

use std::collections::HashMap;

use chatsync_proto::message::{Message, MessageId};

/// Ordered message ledger for one chat.
#[derive(Debug, Clone)]
pub struct ChatLedger {
    order: Vec<MessageId>,
    messages: HashMap<MessageId, Message>,
    has_more: bool,
}

impl Default for ChatLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatLedger {
    /// An empty ledger that still expects older pages.
    #[must_use]
    pub fn new() -> Self {
        Self {
            order: Vec::new(),
            messages: HashMap::new(),
            has_more: true,
        }
    }

    /// Insert `msg` at its chronological position.
    ///
    /// Returns `false` (and changes nothing) if the id is already present.
    pub fn insert(&mut self, msg: Message) -> bool {
        if self.messages.contains_key(&msg.id) {
            return false;
        }
        let position = self
            .order
            .iter()
            .rposition(|id| {
                self.messages
                    .get(id)
                    .is_some_and(|m| m.created_at <= msg.created_at)
            })
            .map_or(0, |i| i + 1);
        self.order.insert(position, msg.id.clone());
        self.messages.insert(msg.id.clone(), msg);
        true
    }

    /// Remove a message, returning it if it was present.
    pub fn remove(&mut self, id: &MessageId) -> Option<Message> {
        let msg = self.messages.remove(id)?;
        self.order.retain(|o| o != id);
        Some(msg)
    }

    /// Swap a temporary entry for its authoritative counterpart.
    ///
    /// The temporary entry is removed whether or not it is still present.
    /// The authoritative message is inserted unless an entry with its id
    /// already arrived by another path.
    pub fn replace(&mut self, temp_id: &MessageId, authoritative: Message) {
        self.remove(temp_id);
        self.insert(authoritative);
    }

    /// Look a message up by id.
    #[must_use]
    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.get(id)
    }

    /// Mutable lookup by id. Callers must not change `id` or `created_at`.
    pub fn get_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        self.messages.get_mut(id)
    }

    /// Whether `id` is present.
    #[must_use]
    pub fn contains(&self, id: &MessageId) -> bool {
        self.messages.contains_key(id)
    }

    /// Messages oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.order.iter().filter_map(|id| self.messages.get(id))
    }

    /// The newest message.
    #[must_use]
    pub fn newest(&self) -> Option<&Message> {
        self.order.last().and_then(|id| self.messages.get(id))
    }

    /// Number of messages held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the ledger holds no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Number of server-confirmed messages held; the offset for the next
    /// backward page.
    #[must_use]
    pub fn server_count(&self) -> usize {
        self.order.iter().filter(|id| !id.is_temporary()).count()
    }

    /// Whether older pages may exist.
    #[must_use]
    pub const fn has_more(&self) -> bool {
        self.has_more
    }

    /// Merge a backward page fetched with `requested` as its page size.
    ///
    /// A short page means the beginning of the history has been reached.
    /// Returns the number of messages actually inserted.
    pub fn apply_page(&mut self, page: Vec<Message>, requested: usize) -> usize {
        if page.len() < requested {
            self.has_more = false;
        }
        page.into_iter().filter_map(|m| self.insert(m).then_some(())).count()
    }
}
