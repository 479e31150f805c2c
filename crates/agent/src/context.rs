use std::collections::HashMap;

use chrono::{DateTime, Utc};
use routewise_core::config::ContextConfig;
use routewise_core::domain::context::{ConversationContext, MessageRole};
use routewise_core::domain::entity::EntityId;
use routewise_core::domain::intent::Intent;
use tokio::sync::Mutex;
use tracing::debug;

/// Messages quoted in a prompt summary.
pub const SUMMARY_MESSAGE_LIMIT: usize = 4;

#[derive(Clone, Debug, PartialEq)]
pub struct TurnRecord {
    pub user_message: String,
    pub assistant_reply: Option<String>,
    pub intent: Intent,
    pub entity: Option<(EntityId, String)>,
    pub at: DateTime<Utc>,
}

impl TurnRecord {
    pub fn new(user_message: impl Into<String>, intent: Intent) -> Self {
        Self {
            user_message: user_message.into(),
            assistant_reply: None,
            intent,
            entity: None,
            at: Utc::now(),
        }
    }

    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.assistant_reply = Some(reply.into());
        self
    }

    pub fn with_entity(mut self, id: EntityId, name: impl Into<String>) -> Self {
        self.entity = Some((id, name.into()));
        self
    }
}

/// Per-conversation state keyed by conversation id. Callers get snapshots;
/// the lock is released before any of them can await.
pub struct ContextManager {
    config: ContextConfig,
    contexts: Mutex<HashMap<String, ConversationContext>>,
}

impl Default for ContextManager {
    fn default() -> Self {
        Self::new(ContextConfig::default())
    }
}

impl ContextManager {
    pub fn new(config: ContextConfig) -> Self {
        Self { config, contexts: Mutex::new(HashMap::new()) }
    }

    pub async fn get_or_create(&self, conversation_id: &str) -> ConversationContext {
        let mut contexts = self.contexts.lock().await;
        contexts
            .entry(conversation_id.to_string())
            .or_insert_with(|| self.fresh(conversation_id))
            .clone()
    }

    pub async fn snapshot(&self, conversation_id: &str) -> Option<ConversationContext> {
        self.contexts.lock().await.get(conversation_id).cloned()
    }

    /// Appends one exchange. The active entity only changes when the turn
    /// names one, so follow-ups keep the thread's subject.
    pub async fn record_turn(&self, conversation_id: &str, turn: TurnRecord) -> ConversationContext {
        let mut contexts = self.contexts.lock().await;
        let context = contexts
            .entry(conversation_id.to_string())
            .or_insert_with(|| self.fresh(conversation_id));

        context.push_message(MessageRole::User, turn.user_message, turn.at);
        if let Some(reply) = turn.assistant_reply {
            context.push_message(MessageRole::Assistant, reply, turn.at);
        }
        context.record_intent(turn.intent, turn.at);
        if let Some((id, name)) = turn.entity {
            context.set_active_entity(id, name);
        }

        debug!(
            event_name = "agent.context.turn_recorded",
            conversation_id,
            intent = turn.intent.as_str(),
            active_entity = context.active_entity_id.as_ref().map(|id| id.as_str()),
            "recorded conversation turn"
        );
        context.clone()
    }

    pub async fn summary(&self, conversation_id: &str) -> String {
        self.snapshot(conversation_id).await.map(|context| summarize(&context)).unwrap_or_default()
    }

    pub async fn reset(&self, conversation_id: &str) -> bool {
        self.contexts.lock().await.remove(conversation_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.contexts.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.contexts.lock().await.is_empty()
    }

    fn fresh(&self, conversation_id: &str) -> ConversationContext {
        ConversationContext::with_limits(
            conversation_id,
            self.config.max_recent_messages,
            self.config.max_intent_history,
        )
    }
}

/// Compact prompt text: active entity, last intent, latest messages.
pub fn summarize(context: &ConversationContext) -> String {
    let mut lines = Vec::new();
    if let (Some(id), Some(name)) = (&context.active_entity_id, &context.active_entity_name) {
        lines.push(format!("当前实体: {name} ({id})"));
    }
    if let Some(intent) = context.last_intent {
        lines.push(format!("上一意图: {intent}"));
    }

    let skip = context.recent_messages.len().saturating_sub(SUMMARY_MESSAGE_LIMIT);
    let messages = context
        .recent_messages
        .iter()
        .skip(skip)
        .map(|message| {
            let speaker = match message.role {
                MessageRole::User => "用户",
                MessageRole::Assistant => "助手",
            };
            format!("{speaker}: {}", message.content)
        })
        .collect::<Vec<_>>();
    if !messages.is_empty() {
        lines.push("最近对话:".to_string());
        lines.extend(messages);
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use routewise_core::config::ContextConfig;
    use routewise_core::domain::entity::EntityId;
    use routewise_core::domain::intent::Intent;

    use super::{summarize, ContextManager, TurnRecord};

    #[tokio::test]
    async fn turns_update_entity_and_intent() {
        let manager = ContextManager::default();
        manager
            .record_turn(
                "c-1",
                TurnRecord::new("海底捞最近怎么样", Intent::StatusQuery)
                    .with_reply("整体健康")
                    .with_entity(EntityId::new("m-001"), "海底捞火锅"),
            )
            .await;
        let context = manager
            .record_turn("c-1", TurnRecord::new("他有什么风险", Intent::Diagnosis))
            .await;

        assert_eq!(context.last_intent, Some(Intent::Diagnosis));
        assert_eq!(context.active_entity_id, Some(EntityId::new("m-001")));
        assert_eq!(context.recent_messages.len(), 3);
        assert_eq!(context.intent_history.len(), 2);
    }

    #[tokio::test]
    async fn conversations_are_isolated_and_resettable() {
        let manager = ContextManager::default();
        manager.get_or_create("c-1").await;
        manager.record_turn("c-2", TurnRecord::new("你好", Intent::GeneralChat)).await;

        assert_eq!(manager.len().await, 2);
        assert!(manager.snapshot("c-1").await.map(|context| context.last_intent.is_none()).unwrap_or(false));
        assert!(manager.reset("c-2").await);
        assert!(!manager.reset("c-2").await);
        assert!(manager.snapshot("c-2").await.is_none());
    }

    #[tokio::test]
    async fn message_window_follows_config() {
        let manager = ContextManager::new(ContextConfig { max_recent_messages: 2, max_intent_history: 50 });
        for index in 0..3 {
            manager
                .record_turn("c-1", TurnRecord::new(format!("问题 {index}"), Intent::DataQuery))
                .await;
        }
        let context = manager.snapshot("c-1").await.expect("context exists");
        let contents = context.recent_messages.iter().map(|m| m.content.as_str()).collect::<Vec<_>>();
        assert_eq!(contents, vec!["问题 1", "问题 2"]);
    }

    #[tokio::test]
    async fn summary_lists_entity_intent_and_latest_messages() {
        let manager = ContextManager::default();
        for index in 0..3 {
            manager
                .record_turn(
                    "c-1",
                    TurnRecord::new(format!("第{index}个问题"), Intent::StatusQuery)
                        .with_reply(format!("第{index}个回答"))
                        .with_entity(EntityId::new("m-002"), "喜茶"),
                )
                .await;
        }

        let summary = manager.summary("c-1").await;
        assert!(summary.starts_with("当前实体: 喜茶 (m-002)\n上一意图: status_query"));
        assert!(summary.contains("助手: 第2个回答"));
        assert!(!summary.contains("第0个问题"));
        assert!(!summary.contains("第0个回答"));
        assert_eq!(manager.summary("missing").await, "");
    }

    #[test]
    fn empty_context_summarizes_to_nothing() {
        let context = routewise_core::domain::context::ConversationContext::new("c-9");
        assert!(summarize(&context).is_empty());
    }
}
