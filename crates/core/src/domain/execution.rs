use serde::{Deserialize, Serialize};

use crate::domain::entity::EntityId;
use crate::errors::RoutingErrorKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Skills,
    Llm,
    Hybrid,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skills => "skills",
            Self::Llm => "llm",
            Self::Hybrid => "hybrid",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "skills" => Some(Self::Skills),
            "llm" => Some(Self::Llm),
            "hybrid" => Some(Self::Hybrid),
            _ => None,
        }
    }
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
            .ok_or_else(|| format!("unsupported strategy `{value}` (expected skills|llm|hybrid)"))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetadata {
    pub data_source: Strategy,
    /// Wall clock of the whole call, in milliseconds.
    pub execution_time: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<EntityId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggested_actions: Vec<String>,
}

impl ExecutionMetadata {
    pub fn new(data_source: Strategy) -> Self {
        Self {
            data_source,
            execution_time: 0,
            entity_id: None,
            entity_name: None,
            suggested_actions: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub kind: RoutingErrorKind,
    pub message: String,
}

/// The stable envelope every routed turn returns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentExecutionResult {
    pub success: bool,
    pub content: String,
    pub metadata: ExecutionMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
}

impl AgentExecutionResult {
    pub fn success(content: impl Into<String>, data_source: Strategy) -> Self {
        Self {
            success: true,
            content: content.into(),
            metadata: ExecutionMetadata::new(data_source),
            suggested_action: None,
            error: None,
        }
    }

    pub fn failure(
        content: impl Into<String>,
        data_source: Strategy,
        kind: RoutingErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            content: content.into(),
            metadata: ExecutionMetadata::new(data_source),
            suggested_action: None,
            error: Some(ExecutionError { kind, message: message.into() }),
        }
    }

    pub fn with_entity(mut self, entity_id: Option<EntityId>, entity_name: Option<String>) -> Self {
        self.metadata.entity_id = entity_id;
        self.metadata.entity_name = entity_name;
        self
    }

    pub fn with_suggested_actions(mut self, actions: Vec<String>) -> Self {
        self.metadata.suggested_actions = actions;
        self
    }

    pub fn data_source(&self) -> Strategy {
        self.metadata.data_source
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::domain::entity::EntityId;
    use crate::errors::RoutingErrorKind;

    use super::{AgentExecutionResult, Strategy};

    #[test]
    fn envelope_serializes_with_camel_case_contract() {
        let mut result = AgentExecutionResult::success("健康度 82", Strategy::Skills)
            .with_entity(Some(EntityId::new("m-001")), Some("海底捞火锅".to_string()))
            .with_suggested_actions(vec!["查看风险".to_string()]);
        result.metadata.execution_time = 12;

        let value = serde_json::to_value(&result).expect("serialize envelope");
        assert_eq!(
            value,
            json!({
                "success": true,
                "content": "健康度 82",
                "metadata": {
                    "dataSource": "skills",
                    "executionTime": 12,
                    "entityId": "m-001",
                    "entityName": "海底捞火锅",
                    "suggestedActions": ["查看风险"]
                }
            })
        );
    }

    #[test]
    fn failure_envelope_carries_error_kind() {
        let result = AgentExecutionResult::failure(
            "没有找到",
            Strategy::Skills,
            RoutingErrorKind::EntityNotResolved,
            "no entity matched",
        );
        let value = serde_json::to_value(&result).expect("serialize envelope");

        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["kind"], "entity_not_resolved");
    }

    #[test]
    fn strategy_parse_rejects_unknown_values() {
        assert_eq!("hybrid".parse::<Strategy>(), Ok(Strategy::Hybrid));
        assert!("rag".parse::<Strategy>().is_err());
    }
}
