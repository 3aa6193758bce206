//! Chat application layer.
//!
//! Contains the [`ChatClient`] which wires the transport, the conversation
//! store, the event router, the sync engine and the ack tracker together.
//! Broadcast envelopes from the transport are parsed, routed into the
//! store, and any network follow-up (delivery acks, debounced mark-read,
//! sync runs) is spawned as a background task whose failure is reported on
//! the [`BackgroundError`] channel instead of being awaited by the handler.

pub mod ack;
pub mod ledger;
pub mod router;
mod send;
pub mod store;
pub mod sync;

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use chatsync_proto::codec::Envelope;
use chatsync_proto::event::ServerEvent;
use chatsync_proto::message::{ChatId, MessageId, UserId, ValidationError};
use chatsync_proto::request::{
    AckDeliveryRequest, ChatListResponse, FetchMessagesRequest, MarkReadRequest,
    MessagePageResponse, OkResponse, RequestKind,
};

use crate::config::{ClientConfig, ConfigError, SyncConfig};
use crate::transport::hybrid::HybridChannel;
use crate::transport::manager::{Subscription, TransportManager};
use crate::transport::rest::RestClient;
use crate::transport::{self, ConnectionState, RequestChannel, RequestError};

use ack::AckTracker;
use router::{EventRouter, FollowUp};
use store::{ConversationStore, StoreEvent};
use sync::{SyncEngine, SyncError, SyncReport};

/// Errors that can occur when sending a message.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The text failed validation; nothing was inserted or sent.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The chat is not in the chat list, so its recipient is unknown.
    #[error("unknown chat: {0}")]
    UnknownChat(ChatId),

    /// The request failed on every channel; the optimistic entry was
    /// reverted and the text restored to the draft.
    #[error("send failed: {0}")]
    Request(#[from] RequestError),
}

/// Failure of a background task, reported without blocking the caller.
#[derive(Debug, thiserror::Error)]
pub enum BackgroundError {
    /// A delivery acknowledgement call failed; the ids may be acked again.
    #[error("delivery ack for {} message(s) in {chat_id} failed: {error}", message_ids.len())]
    DeliveryAck {
        /// Chat the messages belong to.
        chat_id: ChatId,
        /// Ids that were not acknowledged.
        message_ids: Vec<MessageId>,
        /// Underlying failure.
        error: RequestError,
    },

    /// A debounced mark-read call failed.
    #[error("mark-read for {chat_id} failed: {error}")]
    MarkRead {
        /// Chat that stays unread on the server.
        chat_id: ChatId,
        /// Underlying failure.
        error: RequestError,
    },

    /// A sync run failed; it is retried on the next trigger.
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Client handle type built from configuration: socket first, REST fallback.
pub type DefaultChannel = HybridChannel<TransportManager, RestClient>;

/// State shared with transport callbacks and background tasks.
struct Inner<C: RequestChannel> {
    me: UserId,
    config: SyncConfig,
    transport: TransportManager,
    channel: C,
    store: Mutex<ConversationStore>,
    router: EventRouter,
    acks: AckTracker,
    sync: SyncEngine,
    mark_read_timers: Mutex<HashMap<ChatId, JoinHandle<()>>>,
    background_tx: mpsc::Sender<BackgroundError>,
}

/// Explicitly constructed chat client owning every sync component.
///
/// Requests go through `channel` (normally a [`DefaultChannel`]); the
/// [`TransportManager`] supplies broadcast events and reconnect
/// notifications. Nothing is global: dropping the client unregisters its
/// transport callbacks.
pub struct ChatClient<C: RequestChannel + 'static> {
    inner: Arc<Inner<C>>,
    subscriptions: Vec<Subscription>,
}

impl ChatClient<DefaultChannel> {
    /// Build a client from resolved configuration.
    ///
    /// Returns the client and a receiver for [`BackgroundError`]s.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the server URL or user id is missing or invalid.
    pub fn from_config(
        config: &ClientConfig,
    ) -> Result<(Self, mpsc::Receiver<BackgroundError>), ConfigError> {
        let target = config.to_target()?;
        let me = config
            .user_id
            .clone()
            .map(UserId::new)
            .ok_or(ConfigError::Missing("user id"))?;
        let transport = TransportManager::new(target.clone(), config.transport.clone());
        let rest = RestClient::new(target, config.rest_timeout);
        let channel = HybridChannel::new(transport.clone(), rest);
        Ok(Self::new(me, config.sync.clone(), transport, channel))
    }
}

impl<C: RequestChannel + 'static> ChatClient<C> {
    /// Wire a client around an existing transport and request channel.
    ///
    /// Registers the router on the transport's broadcasts and the sync
    /// engine on its reconnections. Returns the client and a receiver for
    /// [`BackgroundError`]s.
    pub fn new(
        me: UserId,
        config: SyncConfig,
        transport: TransportManager,
        channel: C,
    ) -> (Self, mpsc::Receiver<BackgroundError>) {
        let (background_tx, background_rx) = mpsc::channel(config.event_buffer.max(1));
        let inner = Arc::new(Inner {
            store: Mutex::new(ConversationStore::new(me.clone(), &config)),
            acks: AckTracker::new(config.max_ack_tracking),
            me,
            config,
            transport,
            channel,
            router: EventRouter::new(),
            sync: SyncEngine::new(),
            mark_read_timers: Mutex::new(HashMap::new()),
            background_tx,
        });

        let weak: Weak<Inner<C>> = Arc::downgrade(&inner);
        let events = inner.transport.subscribe(move |envelope| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_envelope(envelope);
            }
        });
        let weak: Weak<Inner<C>> = Arc::downgrade(&inner);
        let reconnects = inner.transport.on_reconnect(move || {
            if let Some(inner) = weak.upgrade() {
                tracing::info!("reconnected, starting catch-up sync");
                inner.spawn_sync();
            }
        });

        let client = Self {
            inner,
            subscriptions: vec![events, reconnects],
        };
        (client, background_rx)
    }

    /// The signed-in user.
    #[must_use]
    pub fn me(&self) -> &UserId {
        &self.inner.me
    }

    /// The underlying transport.
    #[must_use]
    pub fn transport(&self) -> &TransportManager {
        &self.inner.transport
    }

    /// Start connecting. See [`TransportManager::connect`].
    pub fn connect(&self) {
        self.inner.transport.connect();
    }

    /// Disconnect intentionally and cancel pending debounced work.
    pub async fn disconnect(&self) {
        self.inner.cancel_mark_read_timers();
        self.inner.transport.disconnect().await;
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.transport.state()
    }

    /// Subscribe to store change notifications.
    #[must_use]
    pub fn subscribe_store(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.store.lock().subscribe()
    }

    /// Read the store under its lock.
    pub fn with_store<R>(&self, f: impl FnOnce(&ConversationStore) -> R) -> R {
        f(&self.inner.store.lock())
    }

    /// Replace the composer text for `chat_id`.
    pub fn set_draft(&self, chat_id: &ChatId, text: impl Into<String>) {
        self.inner.store.lock().set_draft(chat_id, text);
    }

    /// Turn selection mode on or off. Turning it off clears the selection.
    pub fn set_selection_mode(&self, on: bool) {
        self.inner.store.lock().set_selection_mode(on);
    }

    /// Toggle `id` in the selection. Returns whether it is now selected.
    pub fn toggle_selected(&self, id: &MessageId) -> bool {
        self.inner.store.lock().toggle_selected(id)
    }

    /// Parse and route one broadcast envelope, as the transport does for
    /// every inbound event.
    pub fn handle_envelope(&self, envelope: &Envelope) {
        self.inner.handle_envelope(envelope);
    }

    /// Fetch the chat list and replace the local copy.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] if the list could not be fetched.
    pub async fn refresh_chats(&self) -> Result<usize, RequestError> {
        let ChatListResponse { chats } = transport::call(
            &self.inner.channel,
            RequestKind::ListChats,
            &serde_json::Map::new(),
        )
        .await?;
        let count = chats.len();
        self.inner.store.lock().replace_chat_list(chats);
        Ok(count)
    }

    /// Open `chat_id`: reset its ledger and unread count, load the newest
    /// page, and schedule a mark-read.
    ///
    /// The chat stays open if the page fails to load.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] if the first page could not be fetched.
    pub async fn open_chat(&self, chat_id: &ChatId) -> Result<usize, RequestError> {
        self.inner.store.lock().open_chat(chat_id);
        let loaded = self.fetch_page(chat_id, 0).await?;
        self.inner.schedule_mark_read(chat_id.clone());
        Ok(loaded)
    }

    /// Close the open chat.
    pub fn close_chat(&self) {
        self.inner.store.lock().close_chat();
    }

    /// Load the next older page of `chat_id`.
    ///
    /// Returns the number of messages inserted; `0` once the beginning of
    /// the history has been reached.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] if the page could not be fetched.
    pub async fn load_older(&self, chat_id: &ChatId) -> Result<usize, RequestError> {
        let offset = {
            let store = self.inner.store.lock();
            if !store.has_more(chat_id) {
                return Ok(0);
            }
            store.page_offset(chat_id)
        };
        self.fetch_page(chat_id, offset).await
    }

    async fn fetch_page(&self, chat_id: &ChatId, offset: usize) -> Result<usize, RequestError> {
        let limit = self.inner.config.page_size;
        let request = FetchMessagesRequest {
            chat_id: chat_id.clone(),
            offset,
            limit,
        };
        let MessagePageResponse { messages } =
            transport::call(&self.inner.channel, RequestKind::FetchMessages, &request).await?;
        let inserted = self.inner.store.lock().apply_page(chat_id, messages, limit);
        tracing::debug!(chat_id = %chat_id, offset, inserted, "history page applied");
        Ok(inserted)
    }

    /// Mark `chat_id` read now, cancelling any pending debounced mark-read.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] if the request failed.
    pub async fn mark_read(&self, chat_id: &ChatId) -> Result<(), RequestError> {
        if let Some(timer) = self.inner.mark_read_timers.lock().remove(chat_id) {
            timer.abort();
        }
        self.inner.mark_read_now(chat_id).await
    }

    /// Run the sync engine now and dispatch the follow-ups it produced.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if fetching or acknowledging failed.
    pub async fn sync_now(&self) -> Result<SyncReport, SyncError> {
        self.inner.run_sync().await
    }
}

impl<C: RequestChannel + 'static> Drop for ChatClient<C> {
    fn drop(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
        self.inner.cancel_mark_read_timers();
    }
}

impl<C: RequestChannel + 'static> Inner<C> {
    fn handle_envelope(self: &Arc<Self>, envelope: &Envelope) {
        let event = match ServerEvent::from_envelope(envelope) {
            Ok(Some(event)) => event,
            Ok(None) => {
                tracing::debug!(kind = %envelope.kind, "ignoring unknown event type");
                return;
            }
            Err(e) => {
                tracing::warn!(err = %e, "dropping malformed event");
                return;
            }
        };
        let follow_ups = {
            let mut store = self.store.lock();
            self.router.apply(&mut store, &self.acks, &event)
        };
        self.dispatch(follow_ups);
    }

    fn dispatch(self: &Arc<Self>, follow_ups: Vec<FollowUp>) {
        for follow_up in follow_ups {
            match follow_up {
                FollowUp::MarkRead(chat_id) => self.schedule_mark_read(chat_id),
                FollowUp::AckDelivery {
                    chat_id,
                    message_ids,
                } => self.spawn_delivery_ack(chat_id, &message_ids),
                FollowUp::Sync => self.spawn_sync(),
            }
        }
    }

    fn report(&self, error: BackgroundError) {
        tracing::warn!(err = %error, "background task failed");
        if let Err(e) = self.background_tx.try_send(error) {
            tracing::debug!(err = %e, "background error channel unavailable");
        }
    }

    fn spawn_delivery_ack(self: &Arc<Self>, chat_id: ChatId, message_ids: &[MessageId]) {
        let claimed = self.acks.begin_batch(message_ids);
        if claimed.is_empty() {
            return;
        }
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let request = AckDeliveryRequest {
                chat_id: chat_id.clone(),
                message_ids: claimed.clone(),
            };
            let result: Result<OkResponse, _> =
                transport::call(&inner.channel, RequestKind::AckDelivery, &request).await;
            if let Err(error) = result {
                inner.acks.release(&claimed);
                inner.report(BackgroundError::DeliveryAck {
                    chat_id,
                    message_ids: claimed,
                    error,
                });
            }
        });
    }

    fn spawn_sync(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = inner.run_sync().await {
                inner.report(e.into());
            }
        });
    }

    async fn run_sync(self: &Arc<Self>) -> Result<SyncReport, SyncError> {
        let report = self
            .sync
            .fetch_and_apply(&self.channel, &self.store, &self.router, &self.acks)
            .await?;
        self.dispatch(report.follow_ups.clone());
        Ok(report)
    }

    /// (Re)start the debounce timer for `chat_id`.
    fn schedule_mark_read(self: &Arc<Self>, chat_id: ChatId) {
        let delay: Duration = self.config.mark_read_debounce;
        let weak = Arc::downgrade(self);
        let key = chat_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.mark_read_timers.lock().remove(&chat_id);
            if let Err(error) = inner.mark_read_now(&chat_id).await {
                inner.report(BackgroundError::MarkRead { chat_id, error });
            }
        });
        if let Some(previous) = self.mark_read_timers.lock().insert(key, handle) {
            previous.abort();
        }
    }

    async fn mark_read_now(&self, chat_id: &ChatId) -> Result<(), RequestError> {
        let request = MarkReadRequest {
            chat_id: chat_id.clone(),
        };
        let _: OkResponse = transport::call(&self.channel, RequestKind::MarkRead, &request).await?;
        self.store.lock().reset_unread(chat_id);
        tracing::debug!(chat_id = %chat_id, "chat marked read");
        Ok(())
    }

    fn cancel_mark_read_timers(&self) {
        for (_, timer) in self.mark_read_timers.lock().drain() {
            timer.abort();
        }
    }
}
