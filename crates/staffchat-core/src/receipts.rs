use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use staffchat_types::{ConversationId, Message, MessageId, ReadReceipt, UserId};

use crate::actions::{ActionOutcome, StoreAction};
use crate::api::ChatApi;
use crate::error::{ChatError, ChatResult};
use crate::store::SharedStore;

/// Feeds reader sets from fetched payloads, mark-read responses and realtime
/// receipts into the store. Reader sets only ever grow.
pub struct ReadReceiptAggregator {
    store: SharedStore,
    api: Arc<dyn ChatApi>,
}

impl ReadReceiptAggregator {
    pub fn new(store: SharedStore, api: Arc<dyn ChatApi>) -> Self {
        Self { store, api }
    }

    /// Seed reader sets from receipts embedded in fetched messages.
    pub fn load_from_messages(
        &self,
        conversation_id: ConversationId,
        messages: &[Message],
    ) -> ActionOutcome {
        let mut changed = false;
        for message in messages {
            for receipt in &message.read_by {
                changed |= self
                    .apply_receipt(conversation_id, message.id, receipt)
                    .is_changed();
            }
        }
        if changed {
            ActionOutcome::Changed
        } else {
            ActionOutcome::Unchanged
        }
    }

    /// Mark one message read. The local receipt stays even if the request
    /// fails; the error is returned so the caller can offer a retry.
    pub async fn mark_as_read(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> ChatResult<()> {
        let server_id = message_id
            .server_id()
            .ok_or(ChatError::NotConfirmed(message_id))?;
        let me = self.current_user();

        self.store.dispatch(StoreAction::ReceiveReadReceipts {
            conversation_id,
            user_id: me,
            message_ids: vec![message_id],
            read_at: Utc::now(),
        });

        match self.api.mark_message_read(conversation_id, server_id).await {
            Ok(receipts) => {
                self.merge_confirmed(conversation_id, &receipts);
                Ok(())
            }
            Err(e) => {
                warn!(conversation_id, %message_id, "Mark as read failed: {}", e);
                Err(e.into())
            }
        }
    }

    /// Mark the whole conversation read: the unread count is reset locally
    /// and the current user is added to the reader set of every confirmed
    /// message from others.
    pub async fn mark_conversation_read(&self, conversation_id: ConversationId) -> ChatResult<()> {
        let me = self.current_user();
        let unread_from_others = self
            .store
            .read(|s| {
                s.conversation(conversation_id).map(|c| {
                    c.messages
                        .iter()
                        .filter(|m| m.sender_id != me && m.id.is_confirmed() && !m.is_read_by(me))
                        .map(|m| m.id)
                        .collect::<Vec<_>>()
                })
            })
            .ok_or(ChatError::UnknownConversation(conversation_id))?;

        self.store
            .dispatch(StoreAction::MarkConversationRead { conversation_id });
        if !unread_from_others.is_empty() {
            self.store.dispatch(StoreAction::ReceiveReadReceipts {
                conversation_id,
                user_id: me,
                message_ids: unread_from_others,
                read_at: Utc::now(),
            });
        }

        match self.api.mark_conversation_read(conversation_id).await {
            Ok(receipts) => {
                self.merge_confirmed(conversation_id, &receipts);
                Ok(())
            }
            Err(e) => {
                warn!(conversation_id, "Mark conversation read failed: {}", e);
                Err(e.into())
            }
        }
    }

    /// Translate a realtime read-receipt event into a single store action.
    pub fn apply_realtime_receipt(
        &self,
        conversation_id: ConversationId,
        reader_id: UserId,
        message_ids: Vec<MessageId>,
        read_at: chrono::DateTime<Utc>,
    ) -> ActionOutcome {
        self.store.dispatch(StoreAction::ReceiveReadReceipts {
            conversation_id,
            user_id: reader_id,
            message_ids,
            read_at,
        })
    }

    fn merge_confirmed(&self, conversation_id: ConversationId, receipts: &[ReadReceipt]) {
        for receipt in receipts {
            self.apply_receipt(conversation_id, receipt.message_id, receipt);
        }
    }

    fn apply_receipt(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        receipt: &ReadReceipt,
    ) -> ActionOutcome {
        self.store.dispatch(StoreAction::ReceiveReadReceipts {
            conversation_id,
            user_id: receipt.user_id,
            message_ids: vec![message_id],
            read_at: receipt.read_at,
        })
    }

    fn current_user(&self) -> UserId {
        self.store.read(|s| s.current_user_id())
    }
}
