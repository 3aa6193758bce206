//! Outbound intents for [`ChatClient`].
//!
//! Contains the optimistic send pipeline plus unsend and delete-for-me,
//! singly or on the current selection.

use chatsync_proto::message::{
    ChatId, Message, MessageId, MessageStatus, MessageType, validate_text,
};
use chatsync_proto::request::{
    MessageRefsRequest, OkResponse, RequestKind, SendMessageRequest, SendMessageResponse,
};

use crate::transport::{self, RequestChannel, RequestError};

use super::{ChatClient, SendError};

impl<C: RequestChannel + 'static> ChatClient<C> {
    /// Send a text message with an optimistic local echo.
    ///
    /// Pipeline:
    /// 1. Validate the text (nothing is inserted if this fails)
    /// 2. Insert a `Pending` entry under a temporary id and show it as the
    ///    chat-list preview; the chat's draft is consumed
    /// 3. Issue `send_message` (socket, or REST when the socket is down)
    /// 4. Replace the temporary entry with the server's message, or on
    ///    failure remove it and restore the text to the draft
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Validation`] for empty or oversized text,
    /// [`SendError::UnknownChat`] when the chat is not in the chat list, and
    /// [`SendError::Request`] when the request failed on every channel.
    pub async fn send_text(&self, chat_id: &ChatId, text: &str) -> Result<Message, SendError> {
        validate_text(text)?;

        let optimistic = {
            let mut store = self.inner.store.lock();
            let recipient = store
                .chat(chat_id)
                .map(|c| c.other_user_id.clone())
                .ok_or_else(|| SendError::UnknownChat(chat_id.clone()))?;
            let msg = Message::optimistic(chat_id.clone(), self.inner.me.clone(), recipient, text);
            store.take_draft(chat_id);
            store.insert_optimistic(msg.clone());
            msg
        };
        let temp_id = optimistic.id.clone();
        tracing::debug!(chat_id = %chat_id, temp_id = %temp_id, "optimistic message inserted");

        let request = SendMessageRequest {
            chat_id: Some(chat_id.clone()),
            recipient_id: optimistic.recipient_id,
            content: text.to_string(),
            message_type: MessageType::Text,
            temp_id: temp_id.clone(),
            file: None,
        };
        let result: Result<SendMessageResponse, RequestError> =
            transport::call(&self.inner.channel, RequestKind::SendMessage, &request).await;

        match result {
            Ok(response) => {
                let mut message = response.message;
                message.advance_status(MessageStatus::Sent);
                self.inner
                    .store
                    .lock()
                    .confirm_optimistic(&temp_id, message.clone());
                tracing::info!(chat_id = %chat_id, message_id = %message.id, "message sent");
                Ok(message)
            }
            Err(e) => {
                self.inner
                    .store
                    .lock()
                    .fail_optimistic(chat_id, &temp_id, text, &e.to_string());
                Err(SendError::Request(e))
            }
        }
    }

    /// Unsend messages for both participants, leaving tombstones.
    ///
    /// Returns the number of local messages tombstoned.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] if the server did not accept the request;
    /// nothing is changed locally in that case.
    pub async fn unsend(&self, chat_id: &ChatId, ids: &[MessageId]) -> Result<usize, RequestError> {
        self.message_refs(RequestKind::Unsend, chat_id, ids).await?;
        Ok(self.inner.store.lock().tombstone_messages(chat_id, ids))
    }

    /// Delete messages for this user only.
    ///
    /// Returns the number of local messages removed.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] if the server did not accept the request;
    /// nothing is changed locally in that case.
    pub async fn delete_for_me(
        &self,
        chat_id: &ChatId,
        ids: &[MessageId],
    ) -> Result<usize, RequestError> {
        self.message_refs(RequestKind::DeleteForMe, chat_id, ids).await?;
        Ok(self.inner.store.lock().remove_messages(chat_id, ids))
    }

    /// Unsend the selected messages of the open chat, then leave selection
    /// mode. On failure the selection is kept so the user can retry.
    ///
    /// # Errors
    ///
    /// See [`ChatClient::unsend`].
    pub async fn unsend_selected(&self) -> Result<usize, RequestError> {
        let Some((chat_id, ids)) = self.selection_target() else {
            return Ok(0);
        };
        let changed = self.unsend(&chat_id, &ids).await?;
        self.inner.store.lock().set_selection_mode(false);
        Ok(changed)
    }

    /// Delete the selected messages of the open chat for this user, then
    /// leave selection mode. On failure the selection is kept.
    ///
    /// # Errors
    ///
    /// See [`ChatClient::delete_for_me`].
    pub async fn delete_selected(&self) -> Result<usize, RequestError> {
        let Some((chat_id, ids)) = self.selection_target() else {
            return Ok(0);
        };
        let removed = self.delete_for_me(&chat_id, &ids).await?;
        self.inner.store.lock().set_selection_mode(false);
        Ok(removed)
    }

    fn selection_target(&self) -> Option<(ChatId, Vec<MessageId>)> {
        let store = self.inner.store.lock();
        let chat_id = store.active_chat()?.clone();
        let ids = store.selected();
        (!ids.is_empty()).then_some((chat_id, ids))
    }

    async fn message_refs(
        &self,
        kind: RequestKind,
        chat_id: &ChatId,
        ids: &[MessageId],
    ) -> Result<(), RequestError> {
        let request = MessageRefsRequest {
            chat_id: chat_id.clone(),
            message_ids: ids.to_vec(),
        };
        let _: OkResponse = transport::call(&self.inner.channel, kind, &request).await?;
        tracing::debug!(request = %kind, chat_id = %chat_id, count = ids.len(), "message request accepted");
        Ok(())
    }
}
