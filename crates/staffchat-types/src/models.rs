use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ConversationId = i64;
pub type UserId = i64;
pub type AttachmentId = i64;

// -- Identifiers --

/// Client-generated correlation id for a message the server has not confirmed yet.
///
/// The sequence number orders temporary ids by issue time; the nonce keeps them
/// unique across sessions. The id travels to the server as `client_message_id`
/// and comes back on both the HTTP response and the realtime echo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TempId {
    seq: u64,
    nonce: Uuid,
}

impl TempId {
    pub fn new(seq: u64) -> Self {
        Self {
            seq,
            nonce: Uuid::new_v4(),
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tmp-{}-{}", self.seq, self.nonce.simple())
    }
}

/// Error returned when a string is not a `tmp-<seq>-<nonce>` correlation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTempId(pub String);

impl fmt::Display for InvalidTempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid temporary message id '{}'", self.0)
    }
}

impl std::error::Error for InvalidTempId {}

impl FromStr for TempId {
    type Err = InvalidTempId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidTempId(s.to_string());
        let rest = s.strip_prefix("tmp-").ok_or_else(invalid)?;
        let (seq, nonce) = rest.split_once('-').ok_or_else(invalid)?;
        Ok(Self {
            seq: seq.parse().map_err(|_| invalid())?,
            nonce: Uuid::parse_str(nonce).map_err(|_| invalid())?,
        })
    }
}

impl TryFrom<String> for TempId {
    type Error = InvalidTempId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TempId> for String {
    fn from(value: TempId) -> Self {
        value.to_string()
    }
}

/// Message identity: server-assigned once confirmed, a local `TempId` before that.
///
/// `Temporary` sorts after every `Confirmed` id, so optimistic messages always
/// order after the confirmed history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    Confirmed(i64),
    Temporary(TempId),
}

impl MessageId {
    pub fn server_id(&self) -> Option<i64> {
        match self {
            Self::Confirmed(id) => Some(*id),
            Self::Temporary(_) => None,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed(_))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Confirmed(id) => write!(f, "{}", id),
            Self::Temporary(temp) => write!(f, "{}", temp),
        }
    }
}

impl From<i64> for MessageId {
    fn from(id: i64) -> Self {
        Self::Confirmed(id)
    }
}

impl From<TempId> for MessageId {
    fn from(id: TempId) -> Self {
        Self::Temporary(id)
    }
}

// -- Entities --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRef {
    pub id: UserId,
    pub display_name: String,
    #[serde(default)]
    pub is_on_duty: bool,
    #[serde(default)]
    pub role: Option<String>,
}

/// Local delivery state of a message. Never set by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendStatus {
    Pending,
    #[default]
    Sent,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// `None` until the upload is confirmed.
    #[serde(default)]
    pub id: Option<AttachmentId>,
    #[serde(default)]
    pub message_id: Option<MessageId>,
    pub file_name: String,
    pub mime_type: String,
    #[serde(default)]
    pub url: Option<String>,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub emoji: String,
    pub user_id: UserId,
    pub message_id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    #[serde(default)]
    pub sender_name: Option<String>,
    /// `None` for attachment-only messages and after a soft delete.
    #[serde(default)]
    pub text: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub reply_to_id: Option<MessageId>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    #[serde(default)]
    pub read_by: Vec<ReadReceipt>,
    #[serde(default)]
    pub send_status: SendStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<TempId>,
}

impl Message {
    pub fn is_read_by(&self, user_id: UserId) -> bool {
        self.read_by.iter().any(|r| r.user_id == user_id)
    }

    pub fn reaction_of(&self, user_id: UserId) -> Option<&Reaction> {
        self.reactions.iter().find(|r| r.user_id == user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    /// Required for group conversations.
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub participants: Vec<ParticipantRef>,
    /// Oldest first.
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub last_read_message_id: Option<MessageId>,
    /// Cached; derived from `messages` once they are loaded.
    #[serde(default)]
    pub unread_count: u32,
    /// The current user is no longer a member (e.g. removed from a group).
    #[serde(default)]
    pub left: bool,
    /// More history exists before the oldest loaded message.
    #[serde(default)]
    pub has_more: bool,
    #[serde(skip)]
    pub messages_loaded: bool,
}

impl Conversation {
    pub fn participant(&self, user_id: UserId) -> Option<&ParticipantRef> {
        self.participants.iter().find(|p| p.id == user_id)
    }

    pub fn newest_message_id(&self) -> Option<MessageId> {
        self.messages.last().map(|m| m.id)
    }

    /// Oldest confirmed id, used as the pagination cursor.
    pub fn oldest_confirmed_id(&self) -> Option<i64> {
        self.messages.iter().find_map(|m| m.id.server_id())
    }

    /// Title shown to `viewer`: the group title, or the other participant's name.
    pub fn display_title(&self, viewer: UserId) -> String {
        if let Some(title) = self.title.as_deref().filter(|t| !t.is_empty()) {
            return title.to_string();
        }
        self.participants
            .iter()
            .filter(|p| p.id != viewer)
            .map(|p| p.display_name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}
