//! Toggle semantics on top of the store's one-reaction-per-user rule.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use staffchat_types::api::ReactionGroup;
use staffchat_types::{ConversationId, MessageId, Reaction, UserId};

use crate::actions::StoreAction;
use crate::api::ChatApi;
use crate::error::{ApiError, ChatError, ChatResult};
use crate::store::SharedStore;

/// Group reactions by emoji, in order of first appearance.
pub fn group_reactions(reactions: &[Reaction]) -> Vec<ReactionGroup> {
    let mut groups: Vec<ReactionGroup> = Vec::new();
    for reaction in reactions {
        match groups.iter_mut().find(|g| g.emoji == reaction.emoji) {
            Some(group) => {
                if !group.user_ids.contains(&reaction.user_id) {
                    group.user_ids.push(reaction.user_id);
                    group.count += 1;
                }
            }
            None => groups.push(ReactionGroup {
                emoji: reaction.emoji.clone(),
                count: 1,
                user_ids: vec![reaction.user_id],
            }),
        }
    }
    groups
}

/// What a toggle does given the user's current reaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    Added { emoji: String },
    Removed { emoji: String },
    Replaced { previous: String, emoji: String },
}

impl ToggleOutcome {
    /// The user's emoji once the toggle is applied.
    pub fn resulting_emoji(&self) -> Option<&str> {
        match self {
            Self::Added { emoji } | Self::Replaced { emoji, .. } => Some(emoji),
            Self::Removed { .. } => None,
        }
    }
}

pub fn plan_toggle(current: Option<&str>, emoji: &str) -> ToggleOutcome {
    match current {
        Some(existing) if existing == emoji => ToggleOutcome::Removed {
            emoji: emoji.to_string(),
        },
        Some(existing) => ToggleOutcome::Replaced {
            previous: existing.to_string(),
            emoji: emoji.to_string(),
        },
        None => ToggleOutcome::Added {
            emoji: emoji.to_string(),
        },
    }
}

pub struct ReactionAggregator {
    store: SharedStore,
    api: Arc<dyn ChatApi>,
    /// Latest local revision per (conversation, message, user). A response
    /// carrying an older revision is stale and gets dropped.
    revisions: Mutex<HashMap<(ConversationId, i64, UserId), u64>>,
}

impl ReactionAggregator {
    pub fn new(store: SharedStore, api: Arc<dyn ChatApi>) -> Self {
        Self {
            store,
            api,
            revisions: Mutex::new(HashMap::new()),
        }
    }

    /// Toggle the current user's `emoji` on a message.
    ///
    /// The optimistic state is applied in one store update before any request
    /// goes out. On failure the user's previous reaction is restored, unless a
    /// newer toggle has superseded this one.
    pub async fn toggle_reaction(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        emoji: &str,
    ) -> ChatResult<ToggleOutcome> {
        let server_id = message_id
            .server_id()
            .ok_or(ChatError::NotConfirmed(message_id))?;

        // Plan and apply in one step; concurrent toggles each see the
        // previous one's optimistic state.
        let (me, previous, plan, revision) = self.store.update(|s| {
            let me = s.current_user_id();
            let previous = s
                .message(conversation_id, message_id)
                .map(|m| m.reaction_of(me).map(|r| r.emoji.clone()))
                .ok_or(ChatError::UnknownMessage {
                    conversation_id,
                    message_id,
                })?;
            let plan = plan_toggle(previous.as_deref(), emoji);
            let revision = self.bump((conversation_id, server_id, me));
            s.apply(StoreAction::SetUserReaction {
                conversation_id,
                message_id,
                user_id: me,
                emoji: plan.resulting_emoji().map(str::to_string),
            });
            Ok::<_, ChatError>((me, previous, plan, revision))
        })?;
        let key = (conversation_id, server_id, me);

        let result = self.send(conversation_id, server_id, &plan).await;

        let emoji = match &result {
            Ok(reactions) => reactions
                .iter()
                .find(|r| r.user_id == me)
                .map(|r| r.emoji.clone()),
            Err(_) => previous,
        };
        // The staleness check shares the guard with the write, so a toggle
        // planned in between cannot be overwritten.
        let applied = self.store.update(|s| {
            if !self.is_latest(key, revision) {
                return false;
            }
            s.apply(StoreAction::SetUserReaction {
                conversation_id,
                message_id,
                user_id: me,
                emoji,
            });
            true
        });
        if !applied {
            debug!(conversation_id, %message_id, revision, "stale reaction response discarded");
            return Ok(plan);
        }

        result
            .map(|_| plan)
            .inspect_err(|e| warn!(conversation_id, %message_id, "Reaction request failed: {}", e))
            .map_err(Into::into)
    }

    async fn send(
        &self,
        conversation_id: ConversationId,
        server_id: i64,
        plan: &ToggleOutcome,
    ) -> Result<Vec<Reaction>, ApiError> {
        match plan {
            ToggleOutcome::Added { emoji } => {
                self.api.add_reaction(conversation_id, server_id, emoji).await
            }
            ToggleOutcome::Removed { emoji } => {
                self.api
                    .remove_reaction(conversation_id, server_id, emoji)
                    .await
            }
            ToggleOutcome::Replaced { previous, emoji } => {
                self.api
                    .remove_reaction(conversation_id, server_id, previous)
                    .await?;
                self.api.add_reaction(conversation_id, server_id, emoji).await
            }
        }
    }

    fn bump(&self, key: (ConversationId, i64, UserId)) -> u64 {
        let mut revisions = self.revisions.lock().unwrap_or_else(PoisonError::into_inner);
        let revision = revisions.entry(key).or_insert(0);
        *revision += 1;
        *revision
    }

    fn is_latest(&self, key: (ConversationId, i64, UserId), revision: u64) -> bool {
        let revisions = self.revisions.lock().unwrap_or_else(PoisonError::into_inner);
        revisions.get(&key).copied() == Some(revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reaction(emoji: &str, user_id: UserId) -> Reaction {
        Reaction {
            emoji: emoji.into(),
            user_id,
            message_id: MessageId::Confirmed(1),
        }
    }

    #[test]
    fn groups_by_emoji_in_first_seen_order() {
        let groups = group_reactions(&[
            reaction("🎉", 1),
            reaction("👍", 2),
            reaction("🎉", 3),
        ]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].emoji, "🎉");
        assert_eq!(groups[0].count, 2);
        assert_eq!(groups[0].user_ids, vec![1, 3]);
        assert_eq!(groups[1].emoji, "👍");
        assert_eq!(groups[1].count, 1);
    }

    #[test]
    fn toggle_plans() {
        assert_eq!(
            plan_toggle(None, "👍"),
            ToggleOutcome::Added { emoji: "👍".into() }
        );
        assert_eq!(
            plan_toggle(Some("👍"), "👍"),
            ToggleOutcome::Removed { emoji: "👍".into() }
        );
        assert_eq!(
            plan_toggle(Some("🎉"), "👍"),
            ToggleOutcome::Replaced {
                previous: "🎉".into(),
                emoji: "👍".into()
            }
        );
        assert_eq!(plan_toggle(Some("👍"), "👍").resulting_emoji(), None);
    }
}
