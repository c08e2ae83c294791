use chrono::{DateTime, Utc};

use staffchat_types::{
    AttachmentId, Conversation, ConversationId, Message, MessageId, Reaction, SendStatus, UserId,
};

/// Every mutation of the conversation store.
///
/// Optimistic local updates, HTTP completions and realtime events all
/// translate into these, so there is exactly one reducer surface.
#[derive(Debug, Clone)]
pub enum StoreAction {
    // Conversations
    InitConversations {
        conversations: Vec<Conversation>,
    },
    UpsertConversation {
        conversation: Conversation,
    },

    // Message history
    InitMessages {
        conversation_id: ConversationId,
        messages: Vec<Message>,
        has_more: bool,
    },
    OlderMessagesLoaded {
        conversation_id: ConversationId,
        messages: Vec<Message>,
        has_more: bool,
    },

    // Messages
    ReceiveMessage {
        conversation_id: ConversationId,
        message: Message,
    },
    SetSendStatus {
        conversation_id: ConversationId,
        message_id: MessageId,
        status: SendStatus,
    },
    MessageEdited {
        conversation_id: ConversationId,
        message_id: MessageId,
        text: String,
    },
    MessageDeleted {
        conversation_id: ConversationId,
        message_id: MessageId,
        hard: bool,
    },
    AttachmentDeleted {
        conversation_id: ConversationId,
        message_id: MessageId,
        attachment_id: AttachmentId,
    },

    // Reactions
    ReceiveReaction {
        conversation_id: ConversationId,
        message_id: MessageId,
        reaction: Reaction,
    },
    RemoveReaction {
        conversation_id: ConversationId,
        message_id: MessageId,
        user_id: UserId,
        emoji: String,
    },
    /// Set (or clear, with `None`) one user's reaction, leaving other users untouched.
    SetUserReaction {
        conversation_id: ConversationId,
        message_id: MessageId,
        user_id: UserId,
        emoji: Option<String>,
    },

    // Read state
    ReceiveReadReceipts {
        conversation_id: ConversationId,
        user_id: UserId,
        message_ids: Vec<MessageId>,
        read_at: DateTime<Utc>,
    },
    MarkConversationRead {
        conversation_id: ConversationId,
    },

    // View
    SetActiveConversation {
        conversation_id: Option<ConversationId>,
    },
}

impl StoreAction {
    /// Log-safe action tag (never includes message text).
    pub fn tag(&self) -> &'static str {
        match self {
            StoreAction::InitConversations { .. } => "InitConversations",
            StoreAction::UpsertConversation { .. } => "UpsertConversation",
            StoreAction::InitMessages { .. } => "InitMessages",
            StoreAction::OlderMessagesLoaded { .. } => "OlderMessagesLoaded",
            StoreAction::ReceiveMessage { .. } => "ReceiveMessage",
            StoreAction::SetSendStatus { .. } => "SetSendStatus",
            StoreAction::MessageEdited { .. } => "MessageEdited",
            StoreAction::MessageDeleted { .. } => "MessageDeleted",
            StoreAction::AttachmentDeleted { .. } => "AttachmentDeleted",
            StoreAction::ReceiveReaction { .. } => "ReceiveReaction",
            StoreAction::RemoveReaction { .. } => "RemoveReaction",
            StoreAction::SetUserReaction { .. } => "SetUserReaction",
            StoreAction::ReceiveReadReceipts { .. } => "ReceiveReadReceipts",
            StoreAction::MarkConversationRead { .. } => "MarkConversationRead",
            StoreAction::SetActiveConversation { .. } => "SetActiveConversation",
        }
    }

    /// Conversation the action is scoped to, if any.
    pub fn conversation_id(&self) -> Option<ConversationId> {
        match self {
            StoreAction::InitConversations { .. } => None,
            StoreAction::UpsertConversation { conversation } => Some(conversation.id),
            StoreAction::SetActiveConversation { conversation_id } => *conversation_id,
            StoreAction::InitMessages { conversation_id, .. }
            | StoreAction::OlderMessagesLoaded { conversation_id, .. }
            | StoreAction::ReceiveMessage { conversation_id, .. }
            | StoreAction::SetSendStatus { conversation_id, .. }
            | StoreAction::MessageEdited { conversation_id, .. }
            | StoreAction::MessageDeleted { conversation_id, .. }
            | StoreAction::AttachmentDeleted { conversation_id, .. }
            | StoreAction::ReceiveReaction { conversation_id, .. }
            | StoreAction::RemoveReaction { conversation_id, .. }
            | StoreAction::SetUserReaction { conversation_id, .. }
            | StoreAction::ReceiveReadReceipts { conversation_id, .. }
            | StoreAction::MarkConversationRead { conversation_id } => Some(*conversation_id),
        }
    }
}

/// What applying an action did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Nothing changed (duplicate event, unknown target, or no-op).
    Unchanged,
    /// State changed in place.
    Changed,
    /// A message not seen before was appended to the conversation.
    MessageAppended,
}

impl ActionOutcome {
    pub fn is_changed(&self) -> bool {
        !matches!(self, ActionOutcome::Unchanged)
    }
}
