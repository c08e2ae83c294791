//! Outbound send/edit/delete/upload with optimistic placeholders.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tracing::{debug, info, warn};

use staffchat_types::api::{SendMessageRequest, UploadFile};
use staffchat_types::{
    Attachment, AttachmentId, ConversationId, Message, MessageId, SendStatus, TempId,
};

use crate::actions::StoreAction;
use crate::api::ChatApi;
use crate::config::ChatConfig;
use crate::error::{ChatError, ChatResult, ValidationError};
use crate::store::SharedStore;

/// Check a file selection against the configured limits.
pub fn validate_files(files: &[UploadFile], config: &ChatConfig) -> Result<(), ValidationError> {
    if files.is_empty() {
        return Err(ValidationError::NoFiles);
    }
    if files.len() > config.max_files_per_message {
        return Err(ValidationError::TooManyFiles {
            count: files.len(),
            max: config.max_files_per_message,
        });
    }
    if let Some(file) = files
        .iter()
        .find(|f| f.size_bytes() > config.max_file_size_bytes)
    {
        return Err(ValidationError::FileTooLarge {
            file_name: file.file_name.clone(),
            size_bytes: file.size_bytes(),
            max_bytes: config.max_file_size_bytes,
        });
    }
    Ok(())
}

/// Payload of a send that has not been reconciled yet, kept so a failed send
/// can be retried.
#[derive(Clone)]
struct PendingSend {
    conversation_id: ConversationId,
    request: SendMessageRequest,
    files: Arc<Vec<UploadFile>>,
}

pub struct OutboundPipeline {
    store: SharedStore,
    api: Arc<dyn ChatApi>,
    config: ChatConfig,
    next_seq: AtomicU64,
    /// Correlation map: temporary id -> original payload. Entries are dropped
    /// once the server confirms the message or the user discards it.
    pending: Mutex<HashMap<TempId, PendingSend>>,
}

impl OutboundPipeline {
    pub fn new(store: SharedStore, api: Arc<dyn ChatApi>, config: ChatConfig) -> Self {
        Self {
            store,
            api,
            config,
            next_seq: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Send a text message. Returns the confirmed id on success; on failure the
    /// message stays in the store as `failed` and the error is returned.
    pub async fn send_text(
        &self,
        conversation_id: ConversationId,
        text: &str,
        reply_to_id: Option<MessageId>,
    ) -> ChatResult<MessageId> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyBody.into());
        }
        self.ensure_conversation(conversation_id)?;

        let temp = self.next_temp_id();
        let request = SendMessageRequest {
            text: Some(text.to_string()),
            reply_to_id,
            client_message_id: temp,
        };
        self.begin(conversation_id, request, Vec::new());
        self.deliver(temp).await
    }

    /// Send files with an optional caption. Limits are checked before anything
    /// is dispatched or sent.
    pub async fn send_files(
        &self,
        conversation_id: ConversationId,
        files: Vec<UploadFile>,
        text: Option<&str>,
        reply_to_id: Option<MessageId>,
    ) -> ChatResult<MessageId> {
        validate_files(&files, &self.config)?;
        self.ensure_conversation(conversation_id)?;

        let temp = self.next_temp_id();
        let request = SendMessageRequest {
            text: text.map(str::trim).filter(|t| !t.is_empty()).map(str::to_string),
            reply_to_id,
            client_message_id: temp,
        };
        self.begin(conversation_id, request, files);
        self.deliver(temp).await
    }

    /// Re-issue a failed send with its original payload.
    pub async fn retry_send(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> ChatResult<MessageId> {
        let temp = self.failed_temp_id(conversation_id, message_id)?;
        if !self.pending().contains_key(&temp) {
            return Err(ChatError::NotRetryable(message_id));
        }
        info!(conversation_id, %message_id, "Retrying send");
        self.store.dispatch(StoreAction::SetSendStatus {
            conversation_id,
            message_id,
            status: SendStatus::Pending,
        });
        self.deliver(temp).await
    }

    /// Drop a failed message locally and forget its payload.
    pub fn discard_failed(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> ChatResult<()> {
        let temp = self.failed_temp_id(conversation_id, message_id)?;
        self.pending().remove(&temp);
        self.store.dispatch(StoreAction::MessageDeleted {
            conversation_id,
            message_id,
            hard: true,
        });
        Ok(())
    }

    /// Edit a confirmed message. The store changes only after the server accepts.
    pub async fn edit_message(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        text: &str,
    ) -> ChatResult<()> {
        let server_id = self.confirmed_id(conversation_id, message_id)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyBody.into());
        }

        let edited = self
            .api
            .edit_message(conversation_id, server_id, text)
            .await
            .inspect_err(|e| warn!(conversation_id, %message_id, "Edit failed: {}", e))?;

        self.store.dispatch(StoreAction::MessageEdited {
            conversation_id,
            message_id,
            text: edited.text.unwrap_or_else(|| text.to_string()),
        });
        Ok(())
    }

    /// Delete a confirmed message. A failed hard delete leaves the message in place.
    pub async fn delete_message(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        hard: bool,
    ) -> ChatResult<()> {
        let server_id = self.confirmed_id(conversation_id, message_id)?;

        self.api
            .delete_message(conversation_id, server_id, hard)
            .await
            .inspect_err(|e| warn!(conversation_id, %message_id, hard, "Delete failed: {}", e))?;

        self.store.dispatch(StoreAction::MessageDeleted {
            conversation_id,
            message_id,
            hard,
        });
        Ok(())
    }

    pub async fn delete_attachment(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        attachment_id: AttachmentId,
    ) -> ChatResult<()> {
        let server_id = self.confirmed_id(conversation_id, message_id)?;

        self.api
            .delete_attachment(conversation_id, server_id, attachment_id)
            .await
            .inspect_err(|e| {
                warn!(conversation_id, %message_id, attachment_id, "Attachment delete failed: {}", e)
            })?;

        self.store.dispatch(StoreAction::AttachmentDeleted {
            conversation_id,
            message_id,
            attachment_id,
        });
        Ok(())
    }

    /// Number of sends not yet reconciled (in flight or failed).
    pub fn unreconciled(&self) -> usize {
        self.pending().len()
    }

    fn next_temp_id(&self) -> TempId {
        TempId::new(self.next_seq.fetch_add(1, Ordering::Relaxed))
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<TempId, PendingSend>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the payload and insert the optimistic message.
    fn begin(&self, conversation_id: ConversationId, request: SendMessageRequest, files: Vec<UploadFile>) {
        let temp = request.client_message_id;
        let message = self.optimistic_message(conversation_id, &request, &files);
        self.pending().insert(
            temp,
            PendingSend {
                conversation_id,
                request,
                files: Arc::new(files),
            },
        );
        debug!(conversation_id, temp_id = %temp, "optimistic message inserted");
        self.store.dispatch(StoreAction::ReceiveMessage {
            conversation_id,
            message,
        });
    }

    async fn deliver(&self, temp: TempId) -> ChatResult<MessageId> {
        let temp_message_id = MessageId::Temporary(temp);
        let send = self
            .pending()
            .get(&temp)
            .cloned()
            .ok_or(ChatError::NotRetryable(temp_message_id))?;
        let conversation_id = send.conversation_id;

        let result = if send.files.is_empty() {
            self.api.send_message(conversation_id, &send.request).await
        } else {
            self.api
                .send_files(conversation_id, &send.request, &send.files)
                .await
        };

        match result {
            Ok(mut message) => {
                message.client_message_id = Some(temp);
                message.send_status = SendStatus::Sent;
                let id = message.id;
                self.store.dispatch(StoreAction::ReceiveMessage {
                    conversation_id,
                    message,
                });
                self.pending().remove(&temp);
                debug!(conversation_id, temp_id = %temp, message_id = %id, "send confirmed");
                Ok(id)
            }
            Err(e) => {
                warn!(conversation_id, temp_id = %temp, "Send failed: {}", e);
                self.store.dispatch(StoreAction::SetSendStatus {
                    conversation_id,
                    message_id: temp_message_id,
                    status: SendStatus::Failed,
                });
                Err(e.into())
            }
        }
    }

    fn optimistic_message(
        &self,
        conversation_id: ConversationId,
        request: &SendMessageRequest,
        files: &[UploadFile],
    ) -> Message {
        let id = MessageId::Temporary(request.client_message_id);
        let (sender_id, sender_name) = self.store.read(|s| {
            let me = s.current_user_id();
            let name = s
                .conversation(conversation_id)
                .and_then(|c| c.participant(me))
                .map(|p| p.display_name.clone());
            (me, name)
        });

        Message {
            id,
            conversation_id,
            sender_id,
            sender_name,
            text: request.text.clone(),
            created_at: Utc::now(),
            is_edited: false,
            is_deleted: false,
            reply_to_id: request.reply_to_id,
            attachments: files
                .iter()
                .map(|f| Attachment {
                    id: None,
                    message_id: Some(id),
                    file_name: f.file_name.clone(),
                    mime_type: f.mime_type.clone(),
                    url: None,
                    size_bytes: f.size_bytes(),
                })
                .collect(),
            reactions: Vec::new(),
            read_by: Vec::new(),
            send_status: SendStatus::Pending,
            client_message_id: Some(request.client_message_id),
        }
    }

    fn ensure_conversation(&self, conversation_id: ConversationId) -> ChatResult<()> {
        if self.store.read(|s| s.conversation(conversation_id).is_some()) {
            Ok(())
        } else {
            Err(ChatError::UnknownConversation(conversation_id))
        }
    }

    fn confirmed_id(&self, conversation_id: ConversationId, message_id: MessageId) -> ChatResult<i64> {
        let server_id = message_id
            .server_id()
            .ok_or(ChatError::NotConfirmed(message_id))?;
        if self
            .store
            .read(|s| s.message(conversation_id, message_id).is_none())
        {
            return Err(ChatError::UnknownMessage {
                conversation_id,
                message_id,
            });
        }
        Ok(server_id)
    }

    fn failed_temp_id(&self, conversation_id: ConversationId, message_id: MessageId) -> ChatResult<TempId> {
        let MessageId::Temporary(temp) = message_id else {
            return Err(ChatError::NotRetryable(message_id));
        };
        let status = self
            .store
            .read(|s| s.message(conversation_id, message_id).map(|m| m.send_status))
            .ok_or(ChatError::UnknownMessage {
                conversation_id,
                message_id,
            })?;
        if status != SendStatus::Failed {
            return Err(ChatError::NotRetryable(message_id));
        }
        Ok(temp)
    }
}
