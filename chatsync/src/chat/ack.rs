//! Outbound delivery-ack deduplication.
//!
//! [`AckTracker`] remembers which inbound message ids already have a
//! delivery ack in flight or confirmed, so repeated `new_message` events
//! (socket replay, sync catch-up, page reloads) do not produce repeated
//! `ack_delivery` requests. Delivery state itself lives in the chat
//! horizons; the tracker only suppresses duplicate outbound calls.

use std::collections::HashSet;

use parking_lot::Mutex;

use chatsync_proto::message::MessageId;

/// Set of message ids with a delivery ack in flight.
#[derive(Debug)]
pub struct AckTracker {
    ids: Mutex<HashSet<MessageId>>,
    capacity: usize,
}

impl AckTracker {
    /// Create a tracker holding at most `capacity` ids.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            ids: Mutex::new(HashSet::new()),
            capacity: capacity.max(1),
        }
    }

    /// Claim `id` for acking. Returns `false` if it is already claimed.
    pub fn try_begin(&self, id: &MessageId) -> bool {
        let mut ids = self.ids.lock();
        if ids.contains(id) {
            return false;
        }
        Self::make_room(&mut ids, self.capacity);
        ids.insert(id.clone())
    }

    /// Claim every id of `batch` not already claimed, returning those.
    pub fn begin_batch(&self, batch: &[MessageId]) -> Vec<MessageId> {
        let mut ids = self.ids.lock();
        let mut claimed = Vec::with_capacity(batch.len());
        for id in batch {
            if ids.contains(id) {
                continue;
            }
            Self::make_room(&mut ids, self.capacity);
            ids.insert(id.clone());
            claimed.push(id.clone());
        }
        claimed
    }

    /// Forget `batch`, allowing those ids to be acked again.
    pub fn release(&self, batch: &[MessageId]) {
        let mut ids = self.ids.lock();
        for id in batch {
            ids.remove(id);
        }
    }

    /// Whether `id` is claimed.
    #[must_use]
    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.lock().contains(id)
    }

    /// Number of claimed ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    /// Whether no ids are claimed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.lock().is_empty()
    }

    fn make_room(ids: &mut HashSet<MessageId>, capacity: usize) {
        if ids.len() >= capacity {
            tracing::warn!(capacity, "ack tracking set full, clearing");
            ids.clear();
        }
    }
}
