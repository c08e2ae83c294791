//! Process-wide chat session: owns the store and wires the aggregators,
//! pipeline, subscriptions and notification gate around it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use staffchat_types::api::CreateConversationRequest;
use staffchat_types::events::ChannelEnvelope;
use staffchat_types::{ConversationId, Message, UserId};

use crate::actions::{ActionOutcome, StoreAction};
use crate::api::ChatApi;
use crate::config::ChatConfig;
use crate::error::{ChatError, ChatResult, ValidationError};
use crate::notify::{NotificationGate, Notifier};
use crate::pipeline::OutboundPipeline;
use crate::reactions::ReactionAggregator;
use crate::receipts::ReadReceiptAggregator;
use crate::store::{ConversationStore, SharedStore};
use crate::subscriptions::{route_event, RealtimeTransport, SubscriptionManager, SyncReport};

/// One signed-in chat session. Created explicitly at startup and torn down
/// explicitly at shutdown; there is no global instance.
pub struct ChatSession {
    config: ChatConfig,
    store: SharedStore,
    api: Arc<dyn ChatApi>,
    pipeline: OutboundPipeline,
    receipts: ReadReceiptAggregator,
    reactions: ReactionAggregator,
    gate: NotificationGate,
    subscriptions: Mutex<SubscriptionManager>,
}

impl ChatSession {
    pub fn new(
        config: ChatConfig,
        api: Arc<dyn ChatApi>,
        transport: Arc<dyn RealtimeTransport>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let store = SharedStore::new(ConversationStore::new(&config));
        info!(
            user_id = config.current_user_id,
            hotel_id = ?config.hotel_id,
            "Chat session initialized"
        );
        Self {
            pipeline: OutboundPipeline::new(store.clone(), api.clone(), config.clone()),
            receipts: ReadReceiptAggregator::new(store.clone(), api.clone()),
            reactions: ReactionAggregator::new(store.clone(), api.clone()),
            gate: NotificationGate::new(notifier),
            subscriptions: Mutex::new(SubscriptionManager::new(transport, config.hotel_id)),
            store,
            api,
            config,
        }
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn current_user_id(&self) -> UserId {
        self.config.current_user_id
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn pipeline(&self) -> &OutboundPipeline {
        &self.pipeline
    }

    pub fn receipts(&self) -> &ReadReceiptAggregator {
        &self.receipts
    }

    pub fn reactions(&self) -> &ReactionAggregator {
        &self.reactions
    }

    fn subscriptions(&self) -> MutexGuard<'_, SubscriptionManager> {
        self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetch the conversation list and subscribe to every conversation in it.
    pub async fn load_conversations(&self) -> ChatResult<SyncReport> {
        let conversations = self
            .api
            .list_conversations()
            .await
            .inspect_err(|e| warn!("Loading conversations failed: {}", e))?;
        info!(count = conversations.len(), "Conversations loaded");
        self.store
            .dispatch(StoreAction::InitConversations { conversations });
        Ok(self.sync_subscriptions())
    }

    /// Reconcile realtime subscriptions with the conversations in the store.
    pub fn sync_subscriptions(&self) -> SyncReport {
        let known = self.store.read(|s| s.known_conversation_ids());
        self.subscriptions().sync(&known)
    }

    pub fn subscription_handle(
        &self,
        conversation_id: ConversationId,
    ) -> Option<crate::subscriptions::SubscriptionHandle> {
        self.subscriptions().handle(conversation_id).cloned()
    }

    /// Open a conversation view: load its first page if needed, make it the
    /// active conversation and mark it read.
    ///
    /// Marking read is best effort; a failure is logged and not returned.
    pub async fn open_conversation(&self, conversation_id: ConversationId) -> ChatResult<()> {
        let loaded = self
            .store
            .read(|s| s.conversation(conversation_id).map(|c| c.messages_loaded))
            .ok_or(ChatError::UnknownConversation(conversation_id))?;

        if !loaded {
            let page = self
                .api
                .fetch_messages(conversation_id, None, self.config.page_size)
                .await
                .inspect_err(|e| warn!(conversation_id, "Fetching messages failed: {}", e))?;
            debug!(conversation_id, count = page.count, has_more = page.has_more, "first page fetched");
            self.store.dispatch(StoreAction::InitMessages {
                conversation_id,
                messages: page.messages,
                has_more: page.has_more,
            });
        }

        self.store.dispatch(StoreAction::SetActiveConversation {
            conversation_id: Some(conversation_id),
        });

        if let Err(e) = self.receipts.mark_conversation_read(conversation_id).await {
            debug!(conversation_id, "mark read on open failed: {}", e);
        }
        Ok(())
    }

    /// Clear the active conversation if it is `conversation_id`.
    pub fn close_conversation(&self, conversation_id: ConversationId) {
        if self.store.read(|s| s.active_conversation()) == Some(conversation_id) {
            self.store
                .dispatch(StoreAction::SetActiveConversation { conversation_id: None });
        }
    }

    /// Load the page before the oldest loaded message. Returns how many new
    /// messages were prepended.
    pub async fn load_older_messages(&self, conversation_id: ConversationId) -> ChatResult<usize> {
        let (cursor, has_more) = self
            .store
            .read(|s| {
                s.conversation(conversation_id)
                    .map(|c| (c.oldest_confirmed_id(), c.has_more))
            })
            .ok_or(ChatError::UnknownConversation(conversation_id))?;

        let Some(cursor) = cursor.filter(|_| has_more) else {
            return Ok(0);
        };

        let page = self
            .api
            .fetch_messages(conversation_id, Some(cursor), self.config.page_size)
            .await
            .inspect_err(|e| warn!(conversation_id, "Fetching older messages failed: {}", e))?;

        // Measured under the same guard so realtime arrivals are not counted.
        let added = self.store.update(|s| {
            let len = |s: &ConversationStore| {
                s.conversation(conversation_id)
                    .map_or(0, |c| c.messages.len())
            };
            let before = len(&*s);
            s.apply(StoreAction::OlderMessagesLoaded {
                conversation_id,
                messages: page.messages,
                has_more: page.has_more,
            });
            len(&*s).saturating_sub(before)
        });
        Ok(added)
    }

    /// Create a conversation with `participant_ids` (the current user is
    /// implied). More than one other participant makes it a group, which
    /// needs a title.
    pub async fn create_conversation(
        &self,
        participant_ids: Vec<UserId>,
        title: Option<String>,
    ) -> ChatResult<ConversationId> {
        let me = self.current_user_id();
        let mut participant_ids: Vec<UserId> =
            participant_ids.into_iter().filter(|id| *id != me).collect();
        participant_ids.sort_unstable();
        participant_ids.dedup();

        if participant_ids.is_empty() {
            return Err(ValidationError::NoParticipants.into());
        }
        let title = title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
        if participant_ids.len() > 1 && title.is_none() {
            return Err(ValidationError::MissingGroupTitle.into());
        }

        let request = CreateConversationRequest {
            participant_ids,
            title,
        };
        let conversation = self
            .api
            .create_conversation(&request)
            .await
            .inspect_err(|e| warn!("Creating conversation failed: {}", e))?;
        let conversation_id = conversation.id;
        info!(conversation_id, "Conversation created");

        self.store
            .dispatch(StoreAction::UpsertConversation { conversation });
        self.sync_subscriptions();
        Ok(conversation_id)
    }

    /// Route one realtime event into the store, notify on newly appended
    /// messages, and re-sync subscriptions when a conversation appears.
    pub fn handle_event(&self, envelope: ChannelEnvelope) -> ActionOutcome {
        let ChannelEnvelope { channel, event } = envelope;
        let tag = event.tag();
        let Some(action) = route_event(event) else {
            return ActionOutcome::Unchanged;
        };

        let appended: Option<(ConversationId, Message)> = match &action {
            StoreAction::ReceiveMessage {
                conversation_id,
                message,
            } => Some((*conversation_id, message.clone())),
            _ => None,
        };
        let conversation_added = matches!(action, StoreAction::UpsertConversation { .. });

        let outcome = self.store.dispatch(action);
        debug!(channel = %channel, event = tag, ?outcome, "realtime event applied");

        if outcome == ActionOutcome::MessageAppended {
            if let Some((conversation_id, message)) = appended {
                let notification = self
                    .store
                    .read(|s| self.gate.evaluate(s, conversation_id, &message));
                self.gate.notify(notification);
            }
        }
        if conversation_added && outcome.is_changed() {
            self.sync_subscriptions();
        }
        outcome
    }

    /// Apply events from a transport until its stream ends.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<ChannelEnvelope>) {
        while let Some(envelope) = events.recv().await {
            self.handle_event(envelope);
        }
        info!("Realtime event stream ended");
    }

    /// Close all subscriptions and clear the active conversation.
    pub fn teardown(&self) {
        self.subscriptions().teardown();
        self.store
            .dispatch(StoreAction::SetActiveConversation { conversation_id: None });
        info!("Chat session torn down");
    }
}
