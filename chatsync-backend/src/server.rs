//! Backend server core: shared state, request dispatch, WebSocket and REST
//! surfaces, and event fan-out.
//!
//! Both surfaces authenticate the caller (bearer token, `token` query
//! parameter or `session` cookie) and feed the same [`dispatch`]. Events
//! produced by a request are pushed to every affected participant that has
//! a live socket; participants without one get a sync action queued in the
//! [`ChatStore`] instead, and are nudged to fetch it when they reconnect.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodRouter, get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::{RwLock, mpsc};

use chatsync_proto::codec::{self, Envelope, WireError};
use chatsync_proto::event::{NewMessagePayload, SyncNudgePayload, kind};
use chatsync_proto::message::{ChatId, UserId};
use chatsync_proto::request::{
    AckDeliveryRequest, AckSyncActionsRequest, ChatListResponse, FetchMessagesRequest,
    FetchSyncActionsResponse, MarkReadRequest, MessagePageResponse, MessageRefsRequest,
    OkResponse, RequestKind, SendMessageRequest, SendMessageResponse,
};

use crate::store::{ChatStore, code};

/// Name of the cookie carrying the session token.
pub const SESSION_COOKIE: &str = "session";

/// Default history page size when a REST caller omits `limit`.
const DEFAULT_PAGE_LIMIT: usize = 50;

type Connection = (u64, mpsc::UnboundedSender<Message>);

/// Shared server state holding live connections and chat data.
pub struct ServerState {
    /// Maps a user to the connection id and writer channel of its socket.
    connections: RwLock<HashMap<UserId, Connection>>,
    next_connection: AtomicU64,
    /// Chat data and queued sync actions.
    pub store: ChatStore,
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerState {
    /// Creates a state with an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_store(ChatStore::new())
    }

    /// Creates a state around a pre-configured store.
    #[must_use]
    pub fn with_store(store: ChatStore) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_connection: AtomicU64::new(1),
            store,
        }
    }

    /// Registers a socket for `user`, replacing any previous one.
    ///
    /// Returns the connection id to pass to [`ServerState::unregister`].
    pub async fn register(&self, user: &UserId, sender: mpsc::UnboundedSender<Message>) -> u64 {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let mut conns = self.connections.write().await;
        if conns.insert(user.clone(), (id, sender)).is_some() {
            tracing::info!(user = %user, "replaced existing connection");
        }
        id
    }

    /// Removes `user`'s socket if it is still connection `id`.
    pub async fn unregister(&self, user: &UserId, id: u64) -> bool {
        let mut conns = self.connections.write().await;
        if conns.get(user).is_some_and(|(current, _)| *current == id) {
            conns.remove(user);
            return true;
        }
        false
    }

    /// Returns `true` if `user` has a live socket.
    pub async fn is_online(&self, user: &UserId) -> bool {
        self.connections.read().await.contains_key(user)
    }

    /// Sends a close frame to every connected socket.
    pub async fn close_all_connections(&self) {
        let conns = self.connections.read().await;
        for (user, (_, sender)) in conns.iter() {
            tracing::info!(user = %user, "sending close frame");
            let _ = sender.send(Message::Close(None));
        }
    }

    /// Pushes an event to `user`, or queues it as a sync action when the
    /// user has no live socket.
    pub async fn deliver(&self, user: &UserId, event: &str, payload: Value) {
        let connection = self.connections.read().await.get(user).cloned();
        if let Some((id, sender)) = connection {
            match codec::encode(&Envelope::event(event, payload.clone())) {
                Ok(frame) => {
                    if sender.send(Message::Text(frame.into())).is_ok() {
                        tracing::debug!(user = %user, event, "event pushed");
                        return;
                    }
                    tracing::warn!(user = %user, event, "push failed, queuing");
                    self.unregister(user, id).await;
                }
                Err(e) => {
                    tracing::error!(user = %user, event, error = %e, "failed to encode event");
                    return;
                }
            }
        }
        let queued = self.store.enqueue_action(user, event, payload).await;
        tracing::info!(user = %user, event, queued, "user offline, sync action queued");
    }

    async fn deliver_to_chat(&self, chat_id: &ChatId, event: &str, payload: &Value) {
        let Some(participants) = self.store.participants(chat_id).await else {
            return;
        };
        for user in &participants {
            self.deliver(user, event, payload.clone()).await;
        }
    }

    /// Resolves the caller of a request.
    ///
    /// Accepts `Authorization: Bearer <token>`, a `session=<token>` cookie,
    /// or (for socket upgrades) a `token` query parameter.
    pub async fn authenticate(&self, headers: &HeaderMap, query_token: Option<&str>) -> Option<UserId> {
        let bearer = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        let cookie = headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .find_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                (name == SESSION_COOKIE).then_some(value)
            });
        let token = bearer.or(cookie).or(query_token)?;
        self.store.authenticate(token).await
    }
}

fn parse<T: DeserializeOwned>(payload: Value) -> Result<T, WireError> {
    serde_json::from_value(payload).map_err(|e| WireError::new(code::BAD_REQUEST, e.to_string()))
}

fn reply<T: Serialize>(body: &T) -> Result<Value, WireError> {
    serde_json::to_value(body).map_err(|e| WireError::new("internal", e.to_string()))
}

fn ok() -> Result<Value, WireError> {
    reply(&OkResponse { ok: true })
}

/// Executes one request for `user` and fans out the resulting events.
///
/// # Errors
///
/// Returns the [`WireError`] to send back to the caller.
pub async fn dispatch(
    state: &ServerState,
    user: &UserId,
    request: RequestKind,
    payload: Value,
) -> Result<Value, WireError> {
    let store = &state.store;
    match request {
        RequestKind::SendMessage => {
            let req: SendMessageRequest = parse(payload)?;
            let temp_id = req.temp_id.clone();
            let (message, created) = store.send_message(user, req).await?;
            if created {
                let event = reply(&NewMessagePayload {
                    message: message.clone(),
                })?;
                state.deliver_to_chat(&message.chat_id, kind::NEW_MESSAGE, &event).await;
            }
            reply(&SendMessageResponse { message, temp_id })
        }
        RequestKind::AckDelivery => {
            let req: AckDeliveryRequest = parse(payload)?;
            if let Some(ack) = store.ack_delivery(user, &req).await? {
                state
                    .deliver_to_chat(&req.chat_id, kind::DELIVERY_ACK, &reply(&ack)?)
                    .await;
            }
            ok()
        }
        RequestKind::MarkRead => {
            let req: MarkReadRequest = parse(payload)?;
            let receipt = store.mark_read(user, &req.chat_id).await?;
            state
                .deliver_to_chat(&req.chat_id, kind::READ_RECEIPT, &reply(&receipt)?)
                .await;
            ok()
        }
        RequestKind::Unsend => {
            let req: MessageRefsRequest = parse(payload)?;
            let refs = store.unsend(user, &req).await?;
            state
                .deliver_to_chat(&req.chat_id, kind::UNSEND, &reply(&refs)?)
                .await;
            ok()
        }
        RequestKind::DeleteForMe => {
            let req: MessageRefsRequest = parse(payload)?;
            let refs = store.delete_for_me(user, &req).await?;
            state.deliver(user, kind::DELETE_FOR_ME, reply(&refs)?).await;
            ok()
        }
        RequestKind::FetchSyncActions => reply(&FetchSyncActionsResponse {
            actions: store.pending_actions(user).await,
        }),
        RequestKind::AckSyncActions => {
            let req: AckSyncActionsRequest = parse(payload)?;
            let removed = store.ack_actions(user, &req.action_ids).await;
            tracing::debug!(user = %user, removed, "sync actions acknowledged");
            ok()
        }
        RequestKind::ListChats => reply(&ChatListResponse {
            chats: store.list_chats(user).await,
        }),
        RequestKind::FetchMessages => {
            let req: FetchMessagesRequest = parse(payload)?;
            reply(&MessagePageResponse {
                messages: store.fetch_messages(user, &req).await?,
            })
        }
    }
}

/// Serves one authenticated socket until either side closes it.
pub async fn handle_socket(socket: WebSocket, state: Arc<ServerState>, user: UserId) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let connection = state.register(&user, tx.clone()).await;
    tracing::info!(user = %user, connection, "socket connected");

    let pending = state.store.pending_actions(&user).await;
    if let Some(first) = pending.first() {
        tracing::info!(user = %user, count = pending.len(), "nudging user to sync");
        let nudge = SyncNudgePayload {
            action_id: Some(first.action_id.clone()),
        };
        if let Ok(payload) = serde_json::to_value(&nudge)
            && let Ok(frame) = codec::encode(&Envelope::event(kind::SYNC_ACTION, payload))
        {
            let _ = tx.send(Message::Text(frame.into()));
        }
    }

    let writer_user = user.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(user = %writer_user, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let reader_user = user.clone();
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if let Some(response) = handle_text(&reader_state, &reader_user, text.as_str()).await {
                        let _ = tx.send(Message::Text(response.into()));
                    }
                }
                Message::Close(_) => {
                    tracing::info!(user = %reader_user, "received close frame");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => write_task.abort(),
        _ = &mut write_task => read_task.abort(),
    }

    state.unregister(&user, connection).await;
    tracing::info!(user = %user, connection, "socket disconnected");
}

/// Handles one request frame, returning the encoded response.
async fn handle_text(state: &ServerState, user: &UserId, text: &str) -> Option<String> {
    let envelope = match codec::decode(text) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(user = %user, error = %e, "dropping malformed frame");
            return None;
        }
    };
    if envelope.correlation_id.is_none() {
        tracing::warn!(user = %user, kind = %envelope.kind, "dropping uncorrelated frame");
        return None;
    }
    let response = match RequestKind::from_wire(&envelope.kind) {
        Some(request) => match dispatch(state, user, request, envelope.payload.clone()).await {
            Ok(payload) => Envelope::response_to(&envelope, payload),
            Err(error) => {
                tracing::debug!(user = %user, request = %request, error = %error, "request rejected");
                Envelope::error_response_to(&envelope, error)
            }
        },
        None => Envelope::error_response_to(
            &envelope,
            WireError::new(code::BAD_REQUEST, format!("unknown request type {}", envelope.kind)),
        ),
    };
    match codec::encode(&response) {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::error!(user = %user, error = %e, "failed to encode response");
            None
        }
    }
}

fn status_for(error: &WireError) -> StatusCode {
    match error.code.as_str() {
        code::BAD_REQUEST => StatusCode::BAD_REQUEST,
        code::UNAUTHORIZED => StatusCode::UNAUTHORIZED,
        code::FORBIDDEN => StatusCode::FORBIDDEN,
        code::NOT_FOUND => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: WireError) -> Response {
    (status_for(&error), Json(json!({ "error": error }))).into_response()
}

fn unauthorized() -> Response {
    error_response(WireError::new(code::UNAUTHORIZED, "missing or unknown session"))
}

async fn rest_call(state: &ServerState, headers: &HeaderMap, request: RequestKind, payload: Value) -> Response {
    let Some(user) = state.authenticate(headers, None).await else {
        return unauthorized();
    };
    match dispatch(state, &user, request, payload).await {
        Ok(body) => Json(body).into_response(),
        Err(error) => {
            tracing::debug!(user = %user, request = %request, error = %error, "REST request rejected");
            error_response(error)
        }
    }
}

fn post_route(request: RequestKind) -> MethodRouter<Arc<ServerState>> {
    post(move |State(state): State<Arc<ServerState>>, headers: HeaderMap, body: Bytes| async move {
        match serde_json::from_slice::<Value>(&body) {
            Ok(payload) => rest_call(&state, &headers, request, payload).await,
            Err(e) => error_response(WireError::new(code::BAD_REQUEST, e.to_string())),
        }
    })
}

fn get_route(request: RequestKind) -> MethodRouter<Arc<ServerState>> {
    get(move |State(state): State<Arc<ServerState>>, headers: HeaderMap| async move {
        rest_call(&state, &headers, request, json!({})).await
    })
}

async fn fetch_messages_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(chat_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let number = |name: &str, default: usize| {
        query
            .get(name)
            .map_or(Ok(default), |v| v.parse::<usize>())
            .map_err(|e| WireError::new(code::BAD_REQUEST, format!("{name}: {e}")))
    };
    let page = match (number("offset", 0), number("limit", DEFAULT_PAGE_LIMIT)) {
        (Ok(offset), Ok(limit)) => json!({ "chat_id": chat_id, "offset": offset, "limit": limit }),
        (Err(e), _) | (_, Err(e)) => return error_response(e),
    };
    rest_call(&state, &headers, RequestKind::FetchMessages, page).await
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let token = query.get("token").map(String::as_str);
    let Some(user) = state.authenticate(&headers, token).await else {
        tracing::warn!("rejecting unauthenticated socket");
        return unauthorized();
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, user))
}

/// Builds the router serving `/ws` and the REST routes.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/messages", post_route(RequestKind::SendMessage))
        .route("/api/messages/delivered", post_route(RequestKind::AckDelivery))
        .route("/api/messages/unsend", post_route(RequestKind::Unsend))
        .route("/api/messages/delete-for-me", post_route(RequestKind::DeleteForMe))
        .route("/api/chats", get_route(RequestKind::ListChats))
        .route("/api/chats/read", post_route(RequestKind::MarkRead))
        .route("/api/chats/{chat_id}/messages", get(fetch_messages_handler))
        .route("/api/sync/actions", get_route(RequestKind::FetchSyncActions))
        .route("/api/sync/ack", post_route(RequestKind::AckSyncActions))
        .with_state(state)
}

/// Starts the server with an empty state on `addr`.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(ServerState::new())).await
}

/// Starts the server with a pre-configured [`ServerState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<ServerState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok((bound_addr, handle))
}
