use staffchat_types::{ConversationId, MessageId};
use thiserror::Error;

pub type ChatResult<T> = Result<T, ChatError>;

/// Errors surfaced to the UI layer. The store is never left partially updated
/// when one of these is returned.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("request failed: {0}")]
    Api(#[from] ApiError),

    #[error("realtime transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("unknown conversation {0}")]
    UnknownConversation(ConversationId),

    #[error("unknown message {message_id} in conversation {conversation_id}")]
    UnknownMessage {
        conversation_id: ConversationId,
        message_id: MessageId,
    },

    #[error("message {0} has not been confirmed by the server yet")]
    NotConfirmed(MessageId),

    #[error("message {0} is not in a failed state")]
    NotRetryable(MessageId),
}

impl ChatError {
    /// Whether offering the user a retry makes sense.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api(e) => e.is_transient(),
            Self::Transport(_) => true,
            _ => false,
        }
    }
}

/// Local input errors. Never dispatched to the store or sent to the server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("message body is empty")]
    EmptyBody,

    #[error("no files selected")]
    NoFiles,

    #[error("too many files: {count} selected, at most {max} allowed")]
    TooManyFiles { count: usize, max: usize },

    #[error("file '{file_name}' is {size_bytes} bytes, limit is {max_bytes}")]
    FileTooLarge {
        file_name: String,
        size_bytes: u64,
        max_bytes: u64,
    },

    #[error("group conversations need a title")]
    MissingGroupTitle,

    #[error("a conversation needs at least one other participant")]
    NoParticipants,
}

/// Failures of the REST collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Network failures and 5xx/429 responses are worth retrying; other statuses are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Decode(_) => false,
        }
    }
}

/// Failures of the realtime channel transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,

    #[error("could not connect: {0}")]
    Connect(String),

    #[error("subscription to '{channel}' rejected: {reason}")]
    Rejected { channel: String, reason: String },
}
