//! Realtime channel subscriptions and routing of channel events into store actions.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{info, trace, warn};

use staffchat_types::events::{conversation_channel, hotel_channel, RealtimeEvent};
use staffchat_types::{ConversationId, Reaction};

use crate::actions::StoreAction;
use crate::error::TransportError;

/// Opaque token for one open channel subscription.
///
/// Two handles are the same subscription only if their ids match; the
/// transport issues a fresh id on every subscribe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    channel: String,
}

impl SubscriptionHandle {
    pub fn new(id: u64, channel: impl Into<String>) -> Self {
        Self {
            id,
            channel: channel.into(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

/// The realtime channel collaborator. Events for subscribed channels are
/// delivered out of band (see `ChatSession::run`).
pub trait RealtimeTransport: Send + Sync {
    fn subscribe(&self, channel: &str) -> Result<SubscriptionHandle, TransportError>;

    /// Always succeeds from the caller's point of view; the handle is
    /// discarded even if the remote side has not acknowledged yet.
    fn unsubscribe(&self, handle: &SubscriptionHandle);
}

/// Result of one reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub subscribed: Vec<ConversationId>,
    pub unsubscribed: Vec<ConversationId>,
    /// Subscriptions the transport refused; retried on the next sync.
    pub failed: Vec<ConversationId>,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.subscribed.is_empty() && self.unsubscribed.is_empty() && self.failed.is_empty()
    }
}

/// Keeps exactly one subscription per known conversation, plus the optional
/// hotel-wide channel.
pub struct SubscriptionManager {
    transport: Arc<dyn RealtimeTransport>,
    conversations: HashMap<ConversationId, SubscriptionHandle>,
    hotel_id: Option<i64>,
    hotel: Option<SubscriptionHandle>,
}

impl SubscriptionManager {
    pub fn new(transport: Arc<dyn RealtimeTransport>, hotel_id: Option<i64>) -> Self {
        Self {
            transport,
            conversations: HashMap::new(),
            hotel_id,
            hotel: None,
        }
    }

    /// Open and close only the difference between `known` and what is
    /// currently subscribed. Unchanged subscriptions are left alone.
    pub fn sync(&mut self, known: &BTreeSet<ConversationId>) -> SyncReport {
        let mut report = SyncReport::default();
        self.ensure_hotel_channel();

        let stale: Vec<ConversationId> = self
            .conversations
            .keys()
            .filter(|id| !known.contains(id))
            .copied()
            .collect();
        for conversation_id in stale {
            if let Some(handle) = self.conversations.remove(&conversation_id) {
                self.transport.unsubscribe(&handle);
                info!(conversation_id, channel = handle.channel(), "Unsubscribed");
                report.unsubscribed.push(conversation_id);
            }
        }

        for &conversation_id in known {
            if self.conversations.contains_key(&conversation_id) {
                continue;
            }
            let channel = conversation_channel(conversation_id);
            match self.transport.subscribe(&channel) {
                Ok(handle) => {
                    info!(conversation_id, channel = %channel, "Subscribed");
                    self.conversations.insert(conversation_id, handle);
                    report.subscribed.push(conversation_id);
                }
                Err(e) => {
                    warn!(conversation_id, channel = %channel, "Subscribe failed: {}", e);
                    report.failed.push(conversation_id);
                }
            }
        }

        report.unsubscribed.sort_unstable();
        report
    }

    fn ensure_hotel_channel(&mut self) {
        let Some(hotel_id) = self.hotel_id else {
            return;
        };
        if self.hotel.is_some() {
            return;
        }
        let channel = hotel_channel(hotel_id);
        match self.transport.subscribe(&channel) {
            Ok(handle) => {
                info!(hotel_id, channel = %channel, "Subscribed to hotel channel");
                self.hotel = Some(handle);
            }
            Err(e) => warn!(hotel_id, channel = %channel, "Hotel channel subscribe failed: {}", e),
        }
    }

    pub fn handle(&self, conversation_id: ConversationId) -> Option<&SubscriptionHandle> {
        self.conversations.get(&conversation_id)
    }

    pub fn hotel_handle(&self) -> Option<&SubscriptionHandle> {
        self.hotel.as_ref()
    }

    pub fn subscribed(&self) -> BTreeSet<ConversationId> {
        self.conversations.keys().copied().collect()
    }

    /// Close every open subscription.
    pub fn teardown(&mut self) {
        let count = self.conversations.len() + usize::from(self.hotel.is_some());
        for (_, handle) in self.conversations.drain() {
            self.transport.unsubscribe(&handle);
        }
        if let Some(handle) = self.hotel.take() {
            self.transport.unsubscribe(&handle);
        }
        if count > 0 {
            info!(count, "Closed all realtime subscriptions");
        }
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Translate one channel event into exactly one store action. Typing
/// indicators are presentational and produce none.
pub fn route_event(event: RealtimeEvent) -> Option<StoreAction> {
    let action = match event {
        RealtimeEvent::MessageCreated { message } => StoreAction::ReceiveMessage {
            conversation_id: message.conversation_id,
            message,
        },
        RealtimeEvent::MessageEdited {
            conversation_id,
            message_id,
            text,
        } => StoreAction::MessageEdited {
            conversation_id,
            message_id,
            text,
        },
        RealtimeEvent::MessageDeleted {
            conversation_id,
            message_id,
            hard,
        } => StoreAction::MessageDeleted {
            conversation_id,
            message_id,
            hard,
        },
        RealtimeEvent::ReactionChanged {
            conversation_id,
            message_id,
            user_id,
            emoji,
            removed: true,
        } => StoreAction::RemoveReaction {
            conversation_id,
            message_id,
            user_id,
            emoji,
        },
        RealtimeEvent::ReactionChanged {
            conversation_id,
            message_id,
            user_id,
            emoji,
            removed: false,
        } => StoreAction::ReceiveReaction {
            conversation_id,
            message_id,
            reaction: Reaction {
                emoji,
                user_id,
                message_id,
            },
        },
        RealtimeEvent::ReadReceipt {
            conversation_id,
            reader_id,
            message_ids,
            read_at,
            ..
        } => StoreAction::ReceiveReadReceipts {
            conversation_id,
            user_id: reader_id,
            message_ids,
            read_at,
        },
        RealtimeEvent::Typing {
            conversation_id,
            user_id,
            ..
        } => {
            trace!(conversation_id, user_id, "typing");
            return None;
        }
        RealtimeEvent::ConversationCreated { conversation } => {
            StoreAction::UpsertConversation { conversation }
        }
    };
    Some(action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    use chrono::Utc;
    use staffchat_types::MessageId;

    #[derive(Default)]
    struct Recorder {
        next: AtomicU64,
        log: Mutex<Vec<String>>,
    }

    impl RealtimeTransport for Recorder {
        fn subscribe(&self, channel: &str) -> Result<SubscriptionHandle, TransportError> {
            if channel == "conversation.13" {
                return Err(TransportError::Rejected {
                    channel: channel.into(),
                    reason: "forbidden".into(),
                });
            }
            self.log.lock().unwrap().push(format!("+{channel}"));
            Ok(SubscriptionHandle::new(
                self.next.fetch_add(1, Ordering::Relaxed),
                channel,
            ))
        }

        fn unsubscribe(&self, handle: &SubscriptionHandle) {
            self.log.lock().unwrap().push(format!("-{}", handle.channel()));
        }
    }

    fn set(ids: &[ConversationId]) -> BTreeSet<ConversationId> {
        ids.iter().copied().collect()
    }

    #[test]
    fn sync_only_touches_the_delta() {
        let transport = Arc::new(Recorder::default());
        let mut manager = SubscriptionManager::new(transport.clone(), None);

        let report = manager.sync(&set(&[1, 2]));
        assert_eq!(report.subscribed, vec![1, 2]);
        let kept = manager.handle(2).cloned().unwrap();

        let report = manager.sync(&set(&[2, 3]));
        assert_eq!(report.subscribed, vec![3]);
        assert_eq!(report.unsubscribed, vec![1]);
        assert_eq!(manager.handle(2), Some(&kept));

        assert!(manager.sync(&set(&[2, 3])).is_empty());
    }

    #[test]
    fn failed_subscribe_is_retried_next_sync() {
        let transport = Arc::new(Recorder::default());
        let mut manager = SubscriptionManager::new(transport, None);
        let report = manager.sync(&set(&[12, 13]));
        assert_eq!(report.failed, vec![13]);
        assert_eq!(manager.subscribed(), set(&[12]));
        assert_eq!(manager.sync(&set(&[12, 13])).failed, vec![13]);
    }

    #[test]
    fn hotel_channel_and_teardown() {
        let transport = Arc::new(Recorder::default());
        let mut manager = SubscriptionManager::new(transport.clone(), Some(4));
        manager.sync(&set(&[1]));
        manager.sync(&set(&[1]));
        assert_eq!(manager.hotel_handle().map(|h| h.channel()), Some("hotel.4"));

        manager.teardown();
        assert!(manager.subscribed().is_empty());
        let log = transport.log.lock().unwrap().clone();
        assert_eq!(
            log,
            vec!["+hotel.4", "+conversation.1", "-conversation.1", "-hotel.4"]
        );
    }

    #[test]
    fn typing_routes_to_nothing() {
        assert!(
            route_event(RealtimeEvent::Typing {
                conversation_id: 1,
                user_id: 2,
                user_name: None
            })
            .is_none()
        );
    }

    #[test]
    fn reaction_events_route_by_removed_flag() {
        let added = route_event(RealtimeEvent::ReactionChanged {
            conversation_id: 1,
            message_id: MessageId::Confirmed(5),
            user_id: 2,
            emoji: "👍".into(),
            removed: false,
        });
        assert!(matches!(added, Some(StoreAction::ReceiveReaction { .. })));

        let removed = route_event(RealtimeEvent::ReactionChanged {
            conversation_id: 1,
            message_id: MessageId::Confirmed(5),
            user_id: 2,
            emoji: "👍".into(),
            removed: true,
        });
        assert!(matches!(removed, Some(StoreAction::RemoveReaction { .. })));

        let receipt = route_event(RealtimeEvent::ReadReceipt {
            conversation_id: 1,
            reader_id: 2,
            reader_name: Some("Concierge".into()),
            message_ids: vec![MessageId::Confirmed(5)],
            read_at: Utc::now(),
        });
        assert_eq!(receipt.map(|a| a.tag()), Some("ReceiveReadReceipts"));
    }
}
