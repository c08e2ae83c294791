//! Boundary to the conversation/message REST API.

use async_trait::async_trait;

use staffchat_types::api::{CreateConversationRequest, MessagePage, SendMessageRequest, UploadFile};
use staffchat_types::{AttachmentId, Conversation, ConversationId, Message, Reaction, ReadReceipt};

use crate::error::ApiError;

/// REST collaborator. Message ids here are always server ids; temporary
/// messages never reach the API except through `client_message_id`.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError>;

    /// One page of history, newest page first when `before` is `None`.
    async fn fetch_messages(
        &self,
        conversation_id: ConversationId,
        before: Option<i64>,
        limit: u32,
    ) -> Result<MessagePage, ApiError>;

    async fn send_message(
        &self,
        conversation_id: ConversationId,
        request: &SendMessageRequest,
    ) -> Result<Message, ApiError>;

    async fn send_files(
        &self,
        conversation_id: ConversationId,
        request: &SendMessageRequest,
        files: &[UploadFile],
    ) -> Result<Message, ApiError>;

    async fn edit_message(
        &self,
        conversation_id: ConversationId,
        message_id: i64,
        text: &str,
    ) -> Result<Message, ApiError>;

    async fn delete_message(
        &self,
        conversation_id: ConversationId,
        message_id: i64,
        hard: bool,
    ) -> Result<(), ApiError>;

    async fn delete_attachment(
        &self,
        conversation_id: ConversationId,
        message_id: i64,
        attachment_id: AttachmentId,
    ) -> Result<(), ApiError>;

    /// Returns the message's reactions after the change.
    async fn add_reaction(
        &self,
        conversation_id: ConversationId,
        message_id: i64,
        emoji: &str,
    ) -> Result<Vec<Reaction>, ApiError>;

    /// Returns the message's reactions after the change.
    async fn remove_reaction(
        &self,
        conversation_id: ConversationId,
        message_id: i64,
        emoji: &str,
    ) -> Result<Vec<Reaction>, ApiError>;

    /// Returns the server's reader list for the message.
    async fn mark_message_read(
        &self,
        conversation_id: ConversationId,
        message_id: i64,
    ) -> Result<Vec<ReadReceipt>, ApiError>;

    /// Returns the receipts the server recorded for the conversation.
    async fn mark_conversation_read(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<ReadReceipt>, ApiError>;

    async fn create_conversation(
        &self,
        request: &CreateConversationRequest,
    ) -> Result<Conversation, ApiError>;
}
