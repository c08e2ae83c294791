//! Desktop notification gating.

use std::sync::Arc;

use tracing::{debug, info};

use staffchat_types::events::conversation_channel;
use staffchat_types::{ConversationId, Message, UserId};

use crate::store::ConversationStore;

/// Longest preview shown in a notification body, in characters.
pub const PREVIEW_MAX_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotificationPermission {
    Granted,
    Denied,
    /// The user has not been asked yet.
    #[default]
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationOptions {
    pub body: String,
    pub icon: Option<String>,
    /// Notifications with the same tag replace each other.
    pub tag: String,
}

/// The desktop notification surface.
pub trait Notifier: Send + Sync {
    fn permission(&self) -> NotificationPermission;
    fn show_notification(&self, title: &str, options: NotificationOptions);
}

/// Notifier that writes to `tracing`. Used by headless hosts.
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn permission(&self) -> NotificationPermission {
        NotificationPermission::Granted
    }

    fn show_notification(&self, title: &str, options: NotificationOptions) {
        info!(tag = %options.tag, "Notification: {}: {}", title, options.body);
    }
}

/// Notifier that never shows anything.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn permission(&self) -> NotificationPermission {
        NotificationPermission::Denied
    }

    fn show_notification(&self, _title: &str, _options: NotificationOptions) {}
}

/// Preview text for a message: its text cut to [`PREVIEW_MAX_CHARS`], or the
/// first attachment's name for attachment-only messages.
pub fn preview(message: &Message) -> String {
    if let Some(text) = message.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        return text.chars().take(PREVIEW_MAX_CHARS).collect();
    }
    match message.attachments.first() {
        Some(attachment) => format!("📎 {}", attachment.file_name),
        None => String::new(),
    }
}

/// Whether an appended message warrants a notification at all.
pub fn should_notify(active: Option<ConversationId>, me: UserId, conversation_id: ConversationId, message: &Message) -> bool {
    active != Some(conversation_id) && message.sender_id != me
}

pub struct NotificationGate {
    notifier: Arc<dyn Notifier>,
}

impl NotificationGate {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Title and options for `message`, or `None` when it is suppressed.
    pub fn evaluate(
        &self,
        store: &ConversationStore,
        conversation_id: ConversationId,
        message: &Message,
    ) -> Option<(String, NotificationOptions)> {
        let me = store.current_user_id();
        if !should_notify(store.active_conversation(), me, conversation_id, message) {
            return None;
        }

        let conversation = store.conversation(conversation_id);
        let sender = message
            .sender_name
            .clone()
            .or_else(|| {
                conversation
                    .and_then(|c| c.participant(message.sender_id))
                    .map(|p| p.display_name.clone())
            })
            .unwrap_or_else(|| "New message".to_string());
        let title = match conversation {
            Some(c) if c.is_group => format!("{} in {}", sender, c.display_title(me)),
            _ => sender,
        };

        Some((
            title,
            NotificationOptions {
                body: preview(message),
                icon: None,
                tag: conversation_channel(conversation_id),
            },
        ))
    }

    /// Show a notification if the gate and the permission allow it.
    pub fn notify(&self, notification: Option<(String, NotificationOptions)>) -> bool {
        let Some((title, options)) = notification else {
            return false;
        };
        match self.notifier.permission() {
            NotificationPermission::Granted => {
                self.notifier.show_notification(&title, options);
                true
            }
            permission => {
                debug!(?permission, "notification suppressed by permission");
                false
            }
        }
    }
}
