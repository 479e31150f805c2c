use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("llm capability is unavailable")]
    Unavailable,
    #[error("llm call failed: {0}")]
    CallFailed(String),
    #[error("llm returned an empty response")]
    EmptyResponse,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SkillError {
    #[error("no skill registered for intent `{0}`")]
    NotRegistered(String),
    #[error("skill `{skill}` failed: {message}")]
    Failed { skill: String, message: String },
    #[error("entity `{0}` is missing the metrics this skill needs")]
    MissingMetrics(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("no entity matched `{input}`")]
    EntityNotResolved { input: String, suggestions: Vec<String> },
    #[error("llm capability is unavailable")]
    LlmUnavailable,
    #[error("llm call failed: {0}")]
    LlmCallFailed(String),
    #[error("structured query could not be parsed: {0}")]
    QueryParseFailed(String),
    #[error(transparent)]
    Skill(#[from] SkillError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingErrorKind {
    Validation,
    EntityNotResolved,
    LlmUnavailable,
    LlmCallFailed,
    QueryParseFailed,
    SkillFailed,
}

impl RoutingErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::EntityNotResolved => "entity_not_resolved",
            Self::LlmUnavailable => "llm_unavailable",
            Self::LlmCallFailed => "llm_call_failed",
            Self::QueryParseFailed => "query_parse_failed",
            Self::SkillFailed => "skill_failed",
        }
    }
}

impl From<LlmError> for RoutingError {
    fn from(value: LlmError) -> Self {
        match value {
            LlmError::Unavailable => Self::LlmUnavailable,
            LlmError::CallFailed(message) => Self::LlmCallFailed(message),
            LlmError::EmptyResponse => Self::LlmCallFailed("empty response".to_owned()),
        }
    }
}

impl RoutingError {
    pub fn kind(&self) -> RoutingErrorKind {
        match self {
            Self::Validation(_) => RoutingErrorKind::Validation,
            Self::EntityNotResolved { .. } => RoutingErrorKind::EntityNotResolved,
            Self::LlmUnavailable => RoutingErrorKind::LlmUnavailable,
            Self::LlmCallFailed(_) => RoutingErrorKind::LlmCallFailed,
            Self::QueryParseFailed(_) => RoutingErrorKind::QueryParseFailed,
            Self::Skill(_) => RoutingErrorKind::SkillFailed,
        }
    }

    /// Errors the strategy layer absorbs by switching to a fallback path.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            Self::LlmUnavailable | Self::LlmCallFailed(_) | Self::QueryParseFailed(_)
        )
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Validation(_) => "请输入想了解的商户或问题。",
            Self::EntityNotResolved { .. } => "没有找到对应的商户，请确认名称后再试。",
            Self::LlmUnavailable | Self::LlmCallFailed(_) => "智能分析暂时不可用，已为你切换到基础分析。",
            Self::QueryParseFailed(_) => "问题有点复杂，已按基础方式理解。",
            Self::Skill(_) => "分析服务暂时出错，请稍后再试。",
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{LlmError, RoutingError, RoutingErrorKind, SkillError};

    #[test]
    fn llm_errors_map_to_degradable_routing_errors() {
        let unavailable = RoutingError::from(LlmError::Unavailable);
        let failed = RoutingError::from(LlmError::CallFailed("timeout".to_owned()));

        assert_eq!(unavailable.kind(), RoutingErrorKind::LlmUnavailable);
        assert_eq!(failed.kind(), RoutingErrorKind::LlmCallFailed);
        assert!(unavailable.is_degradable());
        assert!(failed.is_degradable());
    }

    #[test]
    fn entity_not_resolved_is_terminal_for_the_turn() {
        let error = RoutingError::EntityNotResolved {
            input: "不存在的店".to_owned(),
            suggestions: vec!["海底捞火锅".to_owned()],
        };

        assert!(!error.is_degradable());
        assert_eq!(error.kind().as_str(), "entity_not_resolved");
        assert_eq!(error.to_string(), "no entity matched `不存在的店`");
    }

    #[test]
    fn skill_errors_convert_transparently() {
        let error = RoutingError::from(SkillError::NotRegistered("diagnosis".to_owned()));
        assert_eq!(error.kind(), RoutingErrorKind::SkillFailed);
        assert_eq!(error.to_string(), "no skill registered for intent `diagnosis`");
    }
}
