use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Conversation, ConversationId, Message, MessageId, UserId};

/// Realtime channel for a single conversation.
pub fn conversation_channel(conversation_id: ConversationId) -> String {
    format!("conversation.{}", conversation_id)
}

/// Hotel-wide channel carrying conversation-level events.
pub fn hotel_channel(hotel_id: i64) -> String {
    format!("hotel.{}", hotel_id)
}

/// Events pushed by the realtime channel transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum RealtimeEvent {
    /// A message was posted (carries the client correlation id when the sender set one)
    MessageCreated { message: Message },

    /// A message's text was edited
    MessageEdited {
        conversation_id: ConversationId,
        message_id: MessageId,
        text: String,
    },

    /// A message was soft- or hard-deleted
    MessageDeleted {
        conversation_id: ConversationId,
        message_id: MessageId,
        #[serde(default)]
        hard: bool,
    },

    /// A user's reaction on a message was set or cleared
    ReactionChanged {
        conversation_id: ConversationId,
        message_id: MessageId,
        user_id: UserId,
        emoji: String,
        #[serde(default)]
        removed: bool,
    },

    /// A user read one or more messages
    ReadReceipt {
        conversation_id: ConversationId,
        reader_id: UserId,
        #[serde(default)]
        reader_name: Option<String>,
        message_ids: Vec<MessageId>,
        read_at: DateTime<Utc>,
    },

    /// A user is typing (presentational only)
    Typing {
        conversation_id: ConversationId,
        user_id: UserId,
        #[serde(default)]
        user_name: Option<String>,
    },

    /// The current user was added to a new conversation (hotel channel)
    ConversationCreated { conversation: Conversation },
}

impl RealtimeEvent {
    pub fn conversation_id(&self) -> ConversationId {
        match self {
            Self::MessageCreated { message } => message.conversation_id,
            Self::MessageEdited { conversation_id, .. }
            | Self::MessageDeleted { conversation_id, .. }
            | Self::ReactionChanged { conversation_id, .. }
            | Self::ReadReceipt { conversation_id, .. }
            | Self::Typing { conversation_id, .. } => *conversation_id,
            Self::ConversationCreated { conversation } => conversation.id,
        }
    }

    /// Log-safe event name (never includes message text).
    pub fn tag(&self) -> &'static str {
        match self {
            Self::MessageCreated { .. } => "message-created",
            Self::MessageEdited { .. } => "message-edited",
            Self::MessageDeleted { .. } => "message-deleted",
            Self::ReactionChanged { .. } => "reaction-changed",
            Self::ReadReceipt { .. } => "read-receipt",
            Self::Typing { .. } => "typing",
            Self::ConversationCreated { .. } => "conversation-created",
        }
    }
}

/// An event as delivered by a transport, with the channel it arrived on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEnvelope {
    pub channel: String,
    pub event: RealtimeEvent,
}

/// Commands sent FROM client TO the realtime gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Start receiving events published on `channel`
    Subscribe { channel: String },

    /// Stop receiving events published on `channel`
    Unsubscribe { channel: String },
}
