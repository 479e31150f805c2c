use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::entity::EntityId;
use crate::domain::intent::Intent;

pub const DEFAULT_MAX_RECENT_MESSAGES: usize = 10;
pub const DEFAULT_MAX_INTENT_HISTORY: usize = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: MessageRole,
    pub content: String,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntentRecord {
    pub intent: Intent,
    pub at: DateTime<Utc>,
}

/// Rolling state of one conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub conversation_id: String,
    pub last_intent: Option<Intent>,
    pub active_entity_id: Option<EntityId>,
    pub active_entity_name: Option<String>,
    pub recent_messages: VecDeque<ContextMessage>,
    pub intent_history: Vec<IntentRecord>,
    max_recent_messages: usize,
    max_intent_history: usize,
}

impl ConversationContext {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self::with_limits(conversation_id, DEFAULT_MAX_RECENT_MESSAGES, DEFAULT_MAX_INTENT_HISTORY)
    }

    pub fn with_limits(
        conversation_id: impl Into<String>,
        max_recent_messages: usize,
        max_intent_history: usize,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            last_intent: None,
            active_entity_id: None,
            active_entity_name: None,
            recent_messages: VecDeque::with_capacity(max_recent_messages),
            intent_history: Vec::new(),
            max_recent_messages: max_recent_messages.max(1),
            max_intent_history: max_intent_history.max(1),
        }
    }

    pub fn push_message(&mut self, role: MessageRole, content: impl Into<String>, at: DateTime<Utc>) {
        while self.recent_messages.len() >= self.max_recent_messages {
            self.recent_messages.pop_front();
        }
        self.recent_messages.push_back(ContextMessage { role, content: content.into(), at });
    }

    pub fn record_intent(&mut self, intent: Intent, at: DateTime<Utc>) {
        self.last_intent = Some(intent);
        self.intent_history.push(IntentRecord { intent, at });
        if self.intent_history.len() > self.max_intent_history {
            let overflow = self.intent_history.len() - self.max_intent_history;
            self.intent_history.drain(..overflow);
        }
    }

    pub fn set_active_entity(&mut self, id: EntityId, name: impl Into<String>) {
        self.active_entity_id = Some(id);
        self.active_entity_name = Some(name.into());
    }

    pub fn clear_active_entity(&mut self) {
        self.active_entity_id = None;
        self.active_entity_name = None;
    }

    pub fn has_active_entity(&self) -> bool {
        self.active_entity_id.is_some()
    }

    /// Most recent intents, newest first.
    pub fn recent_intents(&self, window: usize) -> impl Iterator<Item = Intent> + '_ {
        self.intent_history.iter().rev().take(window).map(|record| record.intent)
    }

    pub fn max_recent_messages(&self) -> usize {
        self.max_recent_messages
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::domain::intent::Intent;

    use super::{ConversationContext, MessageRole};

    #[test]
    fn recent_messages_evict_oldest_first() {
        let mut context = ConversationContext::with_limits("c-1", 3, 10);
        for index in 0..5 {
            context.push_message(MessageRole::User, format!("turn {index}"), Utc::now());
        }

        let contents =
            context.recent_messages.iter().map(|message| message.content.as_str()).collect::<Vec<_>>();
        assert_eq!(contents, vec!["turn 2", "turn 3", "turn 4"]);
    }

    #[test]
    fn intent_history_is_bounded_and_ordered() {
        let mut context = ConversationContext::with_limits("c-2", 10, 2);
        context.record_intent(Intent::StatusQuery, Utc::now());
        context.record_intent(Intent::Diagnosis, Utc::now());
        context.record_intent(Intent::Recommendation, Utc::now());

        assert_eq!(context.last_intent, Some(Intent::Recommendation));
        assert_eq!(
            context.recent_intents(5).collect::<Vec<_>>(),
            vec![Intent::Recommendation, Intent::Diagnosis]
        );
    }
}
