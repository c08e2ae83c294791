use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use staffchat_types::api::ReactionGroup;
use staffchat_types::{
    AttachmentId, Conversation, ConversationId, Message, MessageId, Reaction, ReadReceipt,
    SendStatus, TempId, UserId,
};

use crate::actions::{ActionOutcome, StoreAction};
use crate::config::ChatConfig;
use crate::reactions::group_reactions;

/// Change notifications published after an action mutates the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    ConversationsChanged,
    MessagesChanged {
        conversation_id: ConversationId,
    },
    UnreadChanged {
        conversation_id: ConversationId,
        unread_count: u32,
    },
    ActiveChanged {
        conversation_id: Option<ConversationId>,
    },
}

/// Sole owner of conversation and message state.
///
/// Every mutation goes through [`ConversationStore::apply`]; the named
/// transition methods are the pure state changes it delegates to. All
/// transitions are idempotent under re-application with identical arguments.
pub struct ConversationStore {
    current_user_id: UserId,
    conversations: BTreeMap<ConversationId, Conversation>,
    active: Option<ConversationId>,
    echo_match_window: TimeDelta,
    changes: broadcast::Sender<StoreChange>,
}

impl ConversationStore {
    pub fn new(config: &ChatConfig) -> Self {
        let (changes, _) = broadcast::channel(config.store_change_capacity.max(1));
        Self {
            current_user_id: config.current_user_id,
            conversations: BTreeMap::new(),
            active: None,
            echo_match_window: TimeDelta::from_std(config.echo_match_window)
                .unwrap_or_else(|_| TimeDelta::seconds(10)),
            changes,
        }
    }

    /// Apply one action and publish the resulting changes.
    pub fn apply(&mut self, action: StoreAction) -> ActionOutcome {
        let tag = action.tag();
        let scope = action.conversation_id();
        let unread_before = scope
            .and_then(|id| self.conversations.get(&id))
            .map(|c| c.unread_count);
        let change = match &action {
            StoreAction::InitConversations { .. } | StoreAction::UpsertConversation { .. } => {
                Some(StoreChange::ConversationsChanged)
            }
            StoreAction::SetActiveConversation { conversation_id } => {
                Some(StoreChange::ActiveChanged {
                    conversation_id: *conversation_id,
                })
            }
            _ => scope.map(|conversation_id| StoreChange::MessagesChanged { conversation_id }),
        };

        let outcome = match action {
            StoreAction::InitConversations { conversations } => {
                self.init_conversations(conversations)
            }
            StoreAction::UpsertConversation { conversation } => {
                self.upsert_conversation(conversation)
            }
            StoreAction::InitMessages {
                conversation_id,
                messages,
                has_more,
            } => self.init_messages(conversation_id, messages, has_more),
            StoreAction::OlderMessagesLoaded {
                conversation_id,
                messages,
                has_more,
            } => self.older_messages_loaded(conversation_id, messages, has_more),
            StoreAction::ReceiveMessage {
                conversation_id,
                message,
            } => self.receive_message(conversation_id, message),
            StoreAction::SetSendStatus {
                conversation_id,
                message_id,
                status,
            } => self.set_send_status(conversation_id, message_id, status),
            StoreAction::MessageEdited {
                conversation_id,
                message_id,
                text,
            } => self.message_edited(conversation_id, message_id, text),
            StoreAction::MessageDeleted {
                conversation_id,
                message_id,
                hard,
            } => self.message_deleted(conversation_id, message_id, hard),
            StoreAction::AttachmentDeleted {
                conversation_id,
                message_id,
                attachment_id,
            } => self.attachment_deleted(conversation_id, message_id, attachment_id),
            StoreAction::ReceiveReaction {
                conversation_id,
                message_id,
                reaction,
            } => self.receive_reaction(conversation_id, message_id, reaction),
            StoreAction::RemoveReaction {
                conversation_id,
                message_id,
                user_id,
                emoji,
            } => self.remove_reaction(conversation_id, message_id, user_id, &emoji),
            StoreAction::SetUserReaction {
                conversation_id,
                message_id,
                user_id,
                emoji,
            } => self.set_user_reaction(conversation_id, message_id, user_id, emoji),
            StoreAction::ReceiveReadReceipts {
                conversation_id,
                user_id,
                message_ids,
                read_at,
            } => self.receive_read_receipts(conversation_id, user_id, &message_ids, read_at),
            StoreAction::MarkConversationRead { conversation_id } => {
                self.mark_conversation_read(conversation_id)
            }
            StoreAction::SetActiveConversation { conversation_id } => {
                self.set_active_conversation(conversation_id)
            }
        };

        debug!(action = tag, conversation_id = ?scope, ?outcome, "store action applied");

        if outcome.is_changed() {
            if let Some(change) = change {
                self.publish(change);
            }
            if let Some(conversation_id) = scope {
                let unread_after = self.conversations.get(&conversation_id).map(|c| c.unread_count);
                if let Some(unread_count) = unread_after.filter(|after| Some(*after) != unread_before)
                {
                    self.publish(StoreChange::UnreadChanged {
                        conversation_id,
                        unread_count,
                    });
                }
            }
        }

        outcome
    }

    pub fn subscribe(&self) -> StoreListener {
        StoreListener {
            rx: self.changes.subscribe(),
        }
    }

    fn publish(&self, change: StoreChange) {
        // No listeners is fine.
        let _ = self.changes.send(change);
    }

    // -- Selectors --

    pub fn current_user_id(&self) -> UserId {
        self.current_user_id
    }

    pub fn conversation(&self, conversation_id: ConversationId) -> Option<&Conversation> {
        self.conversations.get(&conversation_id)
    }

    pub fn conversations(&self) -> impl Iterator<Item = &Conversation> {
        self.conversations.values()
    }

    /// Conversations the current user still belongs to.
    pub fn known_conversation_ids(&self) -> BTreeSet<ConversationId> {
        self.conversations
            .values()
            .filter(|c| !c.left)
            .map(|c| c.id)
            .collect()
    }

    pub fn active_conversation(&self) -> Option<ConversationId> {
        self.active
    }

    pub fn message(&self, conversation_id: ConversationId, message_id: MessageId) -> Option<&Message> {
        self.conversations
            .get(&conversation_id)?
            .messages
            .iter()
            .find(|m| m.id == message_id)
    }

    pub fn total_unread(&self) -> u32 {
        self.conversations
            .values()
            .filter(|c| !c.left)
            .map(|c| c.unread_count)
            .sum()
    }

    /// Reactions grouped by emoji for display. Recomputed on every call.
    pub fn reaction_groups(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> Vec<ReactionGroup> {
        self.message(conversation_id, message_id)
            .map(|m| group_reactions(&m.reactions))
            .unwrap_or_default()
    }

    // -- Conversations --

    /// Merge a freshly fetched conversation list. Loaded message histories are
    /// kept; conversations missing from the list are marked as left.
    pub fn init_conversations(&mut self, conversations: Vec<Conversation>) -> ActionOutcome {
        let incoming: HashSet<ConversationId> = conversations.iter().map(|c| c.id).collect();
        let mut changed = false;

        for conversation in conversations {
            changed |= self.merge_conversation(conversation, true).is_changed();
        }

        for (id, conversation) in self.conversations.iter_mut() {
            if !incoming.contains(id) && !conversation.left {
                conversation.left = true;
                changed = true;
            }
        }

        outcome(changed)
    }

    /// Insert a conversation or refresh its metadata. History is only ever
    /// set by `init_messages`, so embedded messages are ignored.
    ///
    /// A single pushed conversation never lowers the local unread count or
    /// moves the read marker back; only a full list refresh does.
    pub fn upsert_conversation(&mut self, incoming: Conversation) -> ActionOutcome {
        self.merge_conversation(incoming, false)
    }

    fn merge_conversation(&mut self, mut incoming: Conversation, from_list: bool) -> ActionOutcome {
        incoming.messages.clear();
        incoming.left = false;
        incoming.messages_loaded = false;

        let Some(existing) = self.conversations.get_mut(&incoming.id) else {
            self.conversations.insert(incoming.id, incoming);
            return ActionOutcome::Changed;
        };

        let mut changed = false;
        if existing.title != incoming.title {
            existing.title = incoming.title;
            changed = true;
        }
        if existing.is_group != incoming.is_group {
            existing.is_group = incoming.is_group;
            changed = true;
        }
        if existing.participants != incoming.participants {
            existing.participants = incoming.participants;
            changed = true;
        }
        if existing.left {
            existing.left = false;
            changed = true;
        }
        if !existing.messages_loaded && !from_list {
            let unread = existing.unread_count.max(incoming.unread_count);
            let last_read = existing.last_read_message_id.max(incoming.last_read_message_id);
            if existing.unread_count != unread || existing.last_read_message_id != last_read {
                existing.unread_count = unread;
                existing.last_read_message_id = last_read;
                changed = true;
            }
        } else if !existing.messages_loaded {
            // List counters are authoritative until history is loaded locally.
            if existing.unread_count != incoming.unread_count
                || existing.last_read_message_id != incoming.last_read_message_id
                || existing.has_more != incoming.has_more
            {
                existing.unread_count = incoming.unread_count;
                existing.last_read_message_id = incoming.last_read_message_id;
                existing.has_more = incoming.has_more;
                changed = true;
            }
        }
        outcome(changed)
    }

    // -- History --

    /// Set the full message sequence of a conversation (first open).
    ///
    /// Local messages the server does not know yet stay at the end, and
    /// reader sets already known locally are kept.
    pub fn init_messages(
        &mut self,
        conversation_id: ConversationId,
        messages: Vec<Message>,
        has_more: bool,
    ) -> ActionOutcome {
        let me = self.current_user_id;
        let Some(conv) = self.conversations.get_mut(&conversation_id) else {
            debug!(conversation_id, "messages for unknown conversation ignored");
            return ActionOutcome::Unchanged;
        };

        let mut fetched = dedupe_in_arrival_order(messages, conversation_id);
        let fetched_client_ids: HashSet<TempId> =
            fetched.iter().filter_map(|m| m.client_message_id).collect();

        let previous: HashMap<MessageId, &Message> =
            conv.messages.iter().map(|m| (m.id, m)).collect();
        for message in fetched.iter_mut() {
            if let Some(local) = previous.get(&message.id) {
                for receipt in &local.read_by {
                    if !message.is_read_by(receipt.user_id) {
                        message.read_by.push(receipt.clone());
                    }
                }
            }
        }

        // Keep what arrived while the page was in flight: confirmed messages
        // newer than the page, then unsent local ones.
        let fetched_ids: HashSet<MessageId> = fetched.iter().map(|m| m.id).collect();
        let newest_fetched = fetched.iter().filter_map(|m| m.id.server_id()).max();
        let (arrived, unconfirmed): (Vec<Message>, Vec<Message>) = conv
            .messages
            .iter()
            .filter(|m| !fetched_ids.contains(&m.id))
            .filter(|m| {
                m.client_message_id
                    .is_none_or(|temp| !fetched_client_ids.contains(&temp))
            })
            .filter(|m| match m.id.server_id() {
                Some(id) => newest_fetched.is_none_or(|newest| id > newest),
                None => true,
            })
            .cloned()
            .partition(|m| m.id.is_confirmed());
        fetched.extend(arrived);
        fetched.extend(unconfirmed);

        let changed = !conv.messages_loaded || conv.has_more != has_more || conv.messages != fetched;
        conv.messages = fetched;
        conv.messages_loaded = true;
        conv.has_more = has_more;
        recompute_unread(conv, me);
        outcome(changed)
    }

    /// Prepend an older page. Relative order of loaded messages is unchanged.
    pub fn older_messages_loaded(
        &mut self,
        conversation_id: ConversationId,
        messages: Vec<Message>,
        has_more: bool,
    ) -> ActionOutcome {
        let me = self.current_user_id;
        let Some(conv) = self.conversations.get_mut(&conversation_id) else {
            return ActionOutcome::Unchanged;
        };

        let known: HashSet<MessageId> = conv.messages.iter().map(|m| m.id).collect();
        let mut older: Vec<Message> = dedupe_in_arrival_order(messages, conversation_id)
            .into_iter()
            .filter(|m| !known.contains(&m.id))
            .collect();

        let mut changed = conv.has_more != has_more;
        conv.has_more = has_more;
        if older.is_empty() {
            return outcome(changed);
        }

        older.append(&mut conv.messages);
        conv.messages = older;
        changed = true;
        if conv.messages_loaded {
            recompute_unread(conv, me);
        }
        outcome(changed)
    }

    // -- Messages --

    /// Append a message, or merge it into the entry it reconciles with
    /// (same id, same client correlation id, or a matching optimistic echo).
    pub fn receive_message(
        &mut self,
        conversation_id: ConversationId,
        mut message: Message,
    ) -> ActionOutcome {
        let me = self.current_user_id;
        let active = self.active == Some(conversation_id);
        let window = self.echo_match_window;
        let Some(conv) = self.conversations.get_mut(&conversation_id) else {
            debug!(conversation_id, message_id = %message.id, "message for unknown conversation ignored");
            return ActionOutcome::Unchanged;
        };
        message.conversation_id = conversation_id;

        if let Some(idx) = find_reconcile_target(conv, &message, me, window) {
            let old_id = conv.messages[idx].id;
            let changed = merge_message(&mut conv.messages[idx], message);
            let new_id = conv.messages[idx].id;
            if old_id != new_id && conv.last_read_message_id == Some(old_id) {
                conv.last_read_message_id = Some(new_id);
            }
            return outcome(changed);
        }

        let from_other = message.sender_id != me;
        let id = message.id;
        conv.messages.push(message);

        if from_other {
            if active && conv.unread_count == 0 {
                // Visible as it arrives.
                conv.last_read_message_id = Some(id);
            } else if conv.messages_loaded {
                recompute_unread(conv, me);
            } else {
                conv.unread_count += 1;
            }
        }
        ActionOutcome::MessageAppended
    }

    pub fn set_send_status(
        &mut self,
        conversation_id: ConversationId,
        message_id: MessageId,
        status: SendStatus,
    ) -> ActionOutcome {
        let Some(message) = self.message_mut(conversation_id, message_id) else {
            return ActionOutcome::Unchanged;
        };
        if message.send_status == status {
            return ActionOutcome::Unchanged;
        }
        message.send_status = status;
        ActionOutcome::Changed
    }

    /// In-place text edit. Position never changes; deleted messages stay deleted.
    pub fn message_edited(
        &mut self,
        conversation_id: ConversationId,
        message_id: MessageId,
        text: String,
    ) -> ActionOutcome {
        let Some(message) = self.message_mut(conversation_id, message_id) else {
            return ActionOutcome::Unchanged;
        };
        if message.is_deleted || (message.is_edited && message.text.as_deref() == Some(text.as_str())) {
            return ActionOutcome::Unchanged;
        }
        message.text = Some(text);
        message.is_edited = true;
        ActionOutcome::Changed
    }

    /// Soft delete keeps the entry without content; hard delete removes it.
    pub fn message_deleted(
        &mut self,
        conversation_id: ConversationId,
        message_id: MessageId,
        hard: bool,
    ) -> ActionOutcome {
        let me = self.current_user_id;
        let Some(conv) = self.conversations.get_mut(&conversation_id) else {
            return ActionOutcome::Unchanged;
        };
        let Some(idx) = conv.messages.iter().position(|m| m.id == message_id) else {
            return ActionOutcome::Unchanged;
        };

        if hard {
            let removed = conv.messages.remove(idx);
            if conv.last_read_message_id == Some(removed.id) {
                conv.last_read_message_id = idx.checked_sub(1).map(|prev| conv.messages[prev].id);
            }
            if conv.messages_loaded {
                recompute_unread(conv, me);
            }
            return ActionOutcome::Changed;
        }

        let message = &mut conv.messages[idx];
        if message.is_deleted {
            return ActionOutcome::Unchanged;
        }
        message.is_deleted = true;
        message.text = None;
        message.attachments.clear();
        ActionOutcome::Changed
    }

    pub fn attachment_deleted(
        &mut self,
        conversation_id: ConversationId,
        message_id: MessageId,
        attachment_id: AttachmentId,
    ) -> ActionOutcome {
        let Some(message) = self.message_mut(conversation_id, message_id) else {
            return ActionOutcome::Unchanged;
        };
        let before = message.attachments.len();
        message.attachments.retain(|a| a.id != Some(attachment_id));
        outcome(message.attachments.len() != before)
    }

    // -- Reactions --

    /// Insert a reaction, replacing any other reaction of the same user on the
    /// message. Re-applying the same emoji is a no-op.
    pub fn receive_reaction(
        &mut self,
        conversation_id: ConversationId,
        message_id: MessageId,
        reaction: Reaction,
    ) -> ActionOutcome {
        let Some(message) = self.message_mut(conversation_id, message_id) else {
            debug!(conversation_id, %message_id, "reaction for message not loaded locally");
            return ActionOutcome::Unchanged;
        };
        if message
            .reaction_of(reaction.user_id)
            .is_some_and(|r| r.emoji == reaction.emoji)
        {
            return ActionOutcome::Unchanged;
        }
        message.reactions.retain(|r| r.user_id != reaction.user_id);
        message.reactions.push(Reaction {
            message_id: message.id,
            ..reaction
        });
        ActionOutcome::Changed
    }

    pub fn remove_reaction(
        &mut self,
        conversation_id: ConversationId,
        message_id: MessageId,
        user_id: UserId,
        emoji: &str,
    ) -> ActionOutcome {
        let Some(message) = self.message_mut(conversation_id, message_id) else {
            return ActionOutcome::Unchanged;
        };
        let before = message.reactions.len();
        message
            .reactions
            .retain(|r| !(r.user_id == user_id && r.emoji == emoji));
        outcome(message.reactions.len() != before)
    }

    pub fn set_user_reaction(
        &mut self,
        conversation_id: ConversationId,
        message_id: MessageId,
        user_id: UserId,
        emoji: Option<String>,
    ) -> ActionOutcome {
        match emoji {
            Some(emoji) => self.receive_reaction(
                conversation_id,
                message_id,
                Reaction {
                    emoji,
                    user_id,
                    message_id,
                },
            ),
            None => {
                let Some(message) = self.message_mut(conversation_id, message_id) else {
                    return ActionOutcome::Unchanged;
                };
                let before = message.reactions.len();
                message.reactions.retain(|r| r.user_id != user_id);
                outcome(message.reactions.len() != before)
            }
        }
    }

    // -- Read state --

    /// Idempotent insert into a message's reader set. A receipt from the
    /// current user also moves the read marker forward.
    pub fn receive_read_receipt(
        &mut self,
        conversation_id: ConversationId,
        message_id: MessageId,
        user_id: UserId,
        read_at: DateTime<Utc>,
    ) -> ActionOutcome {
        let me = self.current_user_id;
        let Some(conv) = self.conversations.get_mut(&conversation_id) else {
            return ActionOutcome::Unchanged;
        };
        let Some(idx) = conv.messages.iter().position(|m| m.id == message_id) else {
            debug!(conversation_id, %message_id, "read receipt for message not loaded locally");
            return ActionOutcome::Unchanged;
        };

        let mut changed = false;
        let message = &mut conv.messages[idx];
        if !message.is_read_by(user_id) {
            message.read_by.push(ReadReceipt {
                message_id: message.id,
                user_id,
                read_at,
            });
            changed = true;
        }

        if user_id == me {
            let advance = match conv.last_read_message_id {
                None => true,
                Some(last_read) => match conv.messages.iter().position(|m| m.id == last_read) {
                    Some(pos) => idx > pos,
                    None => conv.messages[idx].id > last_read,
                },
            };
            if advance {
                conv.last_read_message_id = Some(conv.messages[idx].id);
                changed = true;
                if conv.messages_loaded {
                    recompute_unread(conv, me);
                }
            }
        }
        outcome(changed)
    }

    pub fn receive_read_receipts(
        &mut self,
        conversation_id: ConversationId,
        user_id: UserId,
        message_ids: &[MessageId],
        read_at: DateTime<Utc>,
    ) -> ActionOutcome {
        let mut changed = false;
        for message_id in message_ids {
            changed |= self
                .receive_read_receipt(conversation_id, *message_id, user_id, read_at)
                .is_changed();
        }
        outcome(changed)
    }

    /// Move the read marker to the newest message and zero the unread count.
    /// The count is reset outright rather than decremented.
    pub fn mark_conversation_read(&mut self, conversation_id: ConversationId) -> ActionOutcome {
        let Some(conv) = self.conversations.get_mut(&conversation_id) else {
            return ActionOutcome::Unchanged;
        };
        let newest = conv.newest_message_id();
        let mut changed = conv.unread_count != 0;
        if newest.is_some() && conv.last_read_message_id != newest {
            conv.last_read_message_id = newest;
            changed = true;
        }
        conv.unread_count = 0;
        outcome(changed)
    }

    pub fn set_active_conversation(
        &mut self,
        conversation_id: Option<ConversationId>,
    ) -> ActionOutcome {
        if self.active == conversation_id {
            return ActionOutcome::Unchanged;
        }
        self.active = conversation_id;
        ActionOutcome::Changed
    }

    fn message_mut(
        &mut self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> Option<&mut Message> {
        self.conversations
            .get_mut(&conversation_id)?
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
    }
}

fn outcome(changed: bool) -> ActionOutcome {
    if changed {
        ActionOutcome::Changed
    } else {
        ActionOutcome::Unchanged
    }
}

/// Sort by arrival (creation time, then id) and drop repeated ids, keeping the
/// last copy of each.
fn dedupe_in_arrival_order(mut messages: Vec<Message>, conversation_id: ConversationId) -> Vec<Message> {
    messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    let mut out: Vec<Message> = Vec::with_capacity(messages.len());
    let mut index: HashMap<MessageId, usize> = HashMap::new();
    for mut message in messages {
        message.conversation_id = conversation_id;
        match index.get(&message.id) {
            Some(&pos) => out[pos] = message,
            None => {
                index.insert(message.id, out.len());
                out.push(message);
            }
        }
    }
    out
}

/// Unread = messages from others after the read marker.
fn recompute_unread(conv: &mut Conversation, me: UserId) {
    let start = match conv.last_read_message_id {
        None => 0,
        Some(last_read) => match conv.messages.iter().position(|m| m.id == last_read) {
            Some(pos) => pos + 1,
            // Marker is outside the loaded window: compare by id order.
            None => conv
                .messages
                .iter()
                .position(|m| m.id > last_read)
                .unwrap_or(conv.messages.len()),
        },
    };
    let unread = conv.messages[start..]
        .iter()
        .filter(|m| m.sender_id != me)
        .count();
    conv.unread_count = u32::try_from(unread).unwrap_or(u32::MAX);
}

fn find_reconcile_target(
    conv: &Conversation,
    incoming: &Message,
    me: UserId,
    window: TimeDelta,
) -> Option<usize> {
    if let Some(idx) = conv.messages.iter().position(|m| m.id == incoming.id) {
        return Some(idx);
    }

    let correlation = incoming.client_message_id.or(match incoming.id {
        MessageId::Temporary(temp) => Some(temp),
        MessageId::Confirmed(_) => None,
    });
    if let Some(temp) = correlation {
        return conv.messages.iter().position(|m| {
            m.id == MessageId::Temporary(temp) || m.client_message_id == Some(temp)
        });
    }

    // Echo without a correlation id: match our own pending message by content.
    if incoming.id.is_confirmed() && incoming.sender_id == me {
        return conv.messages.iter().position(|m| {
            !m.id.is_confirmed()
                && m.send_status == SendStatus::Pending
                && m.sender_id == incoming.sender_id
                && m.text == incoming.text
                && abs_delta(m.created_at, incoming.created_at) <= window
        });
    }
    None
}

fn abs_delta(a: DateTime<Utc>, b: DateTime<Utc>) -> TimeDelta {
    if a > b { a - b } else { b - a }
}

/// Merge a confirmed or repeated copy into an existing entry. Returns whether
/// anything changed.
fn merge_message(existing: &mut Message, incoming: Message) -> bool {
    if existing.id.is_confirmed() && !incoming.id.is_confirmed() {
        // Replayed optimistic insert after confirmation.
        return false;
    }
    let before = existing.clone();

    existing.id = incoming.id;
    existing.client_message_id = existing.client_message_id.or(incoming.client_message_id);
    existing.sender_name = incoming.sender_name.or(existing.sender_name.take());
    existing.created_at = incoming.created_at;
    existing.reply_to_id = incoming.reply_to_id.or(existing.reply_to_id);
    existing.send_status = incoming.send_status;

    if existing.is_deleted || incoming.is_deleted {
        existing.is_deleted = true;
        existing.text = None;
        existing.attachments.clear();
    } else if !(existing.is_edited && !incoming.is_edited) {
        // An unedited echo never overwrites a newer local edit.
        existing.text = incoming.text;
        existing.is_edited = incoming.is_edited;
        existing.attachments = incoming.attachments;
    }

    for reaction in incoming.reactions {
        if existing.reaction_of(reaction.user_id).is_none() {
            existing.reactions.push(reaction);
        }
    }
    for receipt in incoming.read_by {
        if !existing.is_read_by(receipt.user_id) {
            existing.read_by.push(receipt);
        }
    }

    let id = existing.id;
    for reaction in existing.reactions.iter_mut() {
        reaction.message_id = id;
    }
    for receipt in existing.read_by.iter_mut() {
        receipt.message_id = id;
    }
    for attachment in existing.attachments.iter_mut() {
        attachment.message_id = Some(id);
    }

    *existing != before
}

/// Cloneable handle to the store. The lock is never held across an await.
#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<Mutex<ConversationStore>>,
}

impl SharedStore {
    pub fn new(store: ConversationStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConversationStore> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn dispatch(&self, action: StoreAction) -> ActionOutcome {
        self.lock().apply(action)
    }

    pub fn read<R>(&self, f: impl FnOnce(&ConversationStore) -> R) -> R {
        f(&self.lock())
    }

    /// Read and apply actions under one guard, so a decision made from the
    /// current state cannot be raced by another dispatch.
    pub fn update<R>(&self, f: impl FnOnce(&mut ConversationStore) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn subscribe(&self) -> StoreListener {
        self.lock().subscribe()
    }
}

/// Registration on the store change feed. Dropping it unsubscribes.
pub struct StoreListener {
    rx: broadcast::Receiver<StoreChange>,
}

impl StoreListener {
    /// Next change, or `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<StoreChange> {
        loop {
            match self.rx.recv().await {
                Ok(change) => return Some(change),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Store listener lagged by {} changes", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<StoreChange> {
        loop {
            match self.rx.try_recv() {
                Ok(change) => return Some(change),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Store listener lagged by {} changes", n);
                }
                Err(_) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}
}
