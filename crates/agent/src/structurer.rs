//! Turns free text into a `StructuredQuery`.
//!
//! Rules run first. The model is consulted only when the rule confidence is
//! at or below the escalation threshold, and a repair pass always fills the
//! type-specific defaults. Any failure yields a conservative fallback query.

use std::collections::BTreeMap;
use std::sync::Arc;

use routewise_core::config::{ComparisonPolicy, QueryConfig};
use routewise_core::domain::context::ConversationContext;
use routewise_core::domain::entity::EntityResult;
use routewise_core::domain::intent::Intent;
use routewise_core::domain::query::{
    AggregationOp, AggregationSpec, ComparisonTarget, QuerySource, QueryType, StructuredQuery,
};
use routewise_core::errors::{LlmError, RoutingError};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::classifier::IntentClassifier;
use crate::context::summarize;
use crate::llm::{chat_if_available, extract_json_payload, ChatMessage, ChatOptions, LlmClient};
use crate::normalize::normalize;
use crate::prompts;
use crate::resolver::EntityResolver;

pub const FALLBACK_QUERY_CONFIDENCE: f64 = 0.3;
pub const LLM_DEFAULT_CONFIDENCE: f64 = 0.85;

const AGGREGATION_CONFIDENCE: f64 = 0.95;
const TRUSTED_COMPARISON_CONFIDENCE: f64 = 0.92;
const TREND_CONFIDENCE: f64 = 0.92;
const UNANCHORED_CONFIDENCE: f64 = 0.6;
const UNRESOLVED_SINGLE_CONFIDENCE: f64 = 0.4;

const COMPARISON_WORDS: &[&str] = &["对比", "比较", "相比", "vs", "比一比", "pk"];
const TREND_WORDS: &[&str] = &["趋势", "走势", "变化", "环比", "同比"];
const AGGREGATION_WORDS: &[&str] = &[
    "多少家", "几家", "多少个", "有多少", "统计", "数量", "总共", "合计", "平均", "最高", "最低",
    "count", "sum", "average", "avg",
];

const OPERATION_WORDS: &[(AggregationOp, &[&str])] = &[
    (AggregationOp::Sum, &["总共", "合计", "总额", "总和", "sum", "total"]),
    (AggregationOp::Average, &["平均", "均值", "average", "avg"]),
    (AggregationOp::Max, &["最高", "最大", "最多", "max"]),
    (AggregationOp::Min, &["最低", "最小", "最少", "min"]),
];

const GROUP_BY_WORDS: &[(&str, &[&str])] = &[
    ("category", &["品类", "类别", "分类", "业态"]),
    ("health_status", &["健康状态", "健康分布", "健康等级"]),
    ("risk_level", &["风险等级", "风险分布", "风险级别"]),
];

const FIXED_TIME_RANGES: &[(&str, &[&str])] = &[
    ("今天", &["今天", "今日"]),
    ("昨天", &["昨天", "昨日"]),
    ("本周", &["本周", "这周", "这一周"]),
    ("上周", &["上周", "上一周"]),
    ("本月", &["本月", "这个月", "这月"]),
    ("上月", &["上月", "上个月"]),
];

pub struct QueryStructurer {
    config: QueryConfig,
    resolver: Arc<EntityResolver>,
    classifier: IntentClassifier,
}

impl QueryStructurer {
    pub fn new(config: QueryConfig, resolver: Arc<EntityResolver>, classifier: IntentClassifier) -> Self {
        Self { config, resolver, classifier }
    }

    pub async fn structure(
        &self,
        input: &str,
        context: Option<&ConversationContext>,
        llm: Option<&dyn LlmClient>,
    ) -> StructuredQuery {
        let query = match self.try_structure(input, context, llm).await {
            Ok(query) => query,
            Err(error) => {
                warn!(
                    event_name = "agent.structurer.fallback",
                    error_kind = error.kind().as_str(),
                    error = %error,
                    "using conservative fallback query"
                );
                self.fallback(input, context)
            }
        };
        repair(query, context)
    }

    async fn try_structure(
        &self,
        input: &str,
        context: Option<&ConversationContext>,
        llm: Option<&dyn LlmClient>,
    ) -> Result<StructuredQuery, RoutingError> {
        let rules = self.fast_path(input, context)?;
        if rules.confidence > self.config.llm_escalation_threshold {
            return Ok(rules);
        }

        let summary = context.map(summarize).unwrap_or_default();
        let messages = [
            ChatMessage::system(prompts::STRUCTURE_SYSTEM),
            ChatMessage::user(prompts::structure_prompt(input, &summary)),
        ];
        match chat_if_available(llm, &messages, &ChatOptions::cached()).await {
            Ok(content) => {
                let query = parse_llm_query(input, &content)?;
                debug!(
                    event_name = "agent.structurer.llm_structured",
                    query_type = query.query_type.as_str(),
                    rule_confidence = rules.confidence,
                    "query structured by model"
                );
                Ok(query)
            }
            Err(LlmError::Unavailable) => Ok(rules),
            Err(error) => Err(error.into()),
        }
    }

    /// Whether the input uses comparison, aggregation or trend vocabulary,
    /// whatever intent the classifier settled on.
    pub fn is_analytic_phrasing(&self, input: &str) -> bool {
        let normalized = normalize(input);
        [COMPARISON_WORDS, AGGREGATION_WORDS, TREND_WORDS]
            .iter()
            .any(|words| contains_any(&normalized, words))
    }

    /// Rule-only structuring. Never consults the model.
    pub fn fast_path(
        &self,
        input: &str,
        context: Option<&ConversationContext>,
    ) -> Result<StructuredQuery, RoutingError> {
        let normalized = normalize(input);
        if normalized.is_empty() {
            return Err(RoutingError::Validation("empty query".to_string()));
        }

        let mentioned = self.resolver.extract_all(input);
        let mut query = if contains_any(&normalized, COMPARISON_WORDS) {
            self.comparison(input, &normalized, &mentioned)
        } else if contains_any(&normalized, AGGREGATION_WORDS) {
            aggregation(input, &normalized, &mentioned)
        } else if contains_any(&normalized, TREND_WORDS) {
            self.trend(input, &mentioned, context)
        } else {
            self.single_entity(input, context)
        };

        query.entities.time_range = extract_time_range(&normalized);
        query.filters = extract_filters(&normalized);
        Ok(query)
    }

    fn comparison(&self, input: &str, normalized: &str, mentioned: &[EntityResult]) -> StructuredQuery {
        let mut query = StructuredQuery::new(input, QueryType::Comparison, QuerySource::Rules);
        query.entities.names = entity_names(mentioned);
        query.intents = vec![Intent::Comparison];
        query.entities.comparison_target = if query.entities.names.len() >= 2 {
            Some(ComparisonTarget::PeerEntities)
        } else if contains_any(normalized, &["平均", "同行", "同品类", "同类"]) {
            Some(ComparisonTarget::CategoryAverage)
        } else if contains_any(normalized, &["上月", "上个月", "上周", "去年", "环比", "同比", "之前"]) {
            Some(ComparisonTarget::PreviousPeriod)
        } else {
            None
        };
        query.confidence = match self.config.comparison_policy {
            ComparisonPolicy::EscalateToLlm => self.config.comparison_rule_confidence,
            ComparisonPolicy::TrustRules => TRUSTED_COMPARISON_CONFIDENCE,
        };
        query
    }

    fn trend(
        &self,
        input: &str,
        mentioned: &[EntityResult],
        context: Option<&ConversationContext>,
    ) -> StructuredQuery {
        let mut query = StructuredQuery::new(input, QueryType::TrendAnalysis, QuerySource::Rules);
        query.intents = vec![Intent::TrendAnalysis];
        query.entities.names = entity_names(mentioned);
        if query.entities.names.is_empty() {
            if let Some(name) = self.resolve_name(input, context) {
                query.entities.names.push(name);
            }
        }
        query.confidence =
            if query.entities.names.is_empty() { UNANCHORED_CONFIDENCE } else { TREND_CONFIDENCE };
        query
    }

    fn single_entity(&self, input: &str, context: Option<&ConversationContext>) -> StructuredQuery {
        let mut query = StructuredQuery::new(input, QueryType::SingleEntity, QuerySource::Rules);
        let resolved = self.resolver.resolve(input, context.and_then(|c| c.active_entity_id.as_ref()));
        let intent = self.classifier.classify(input, context);
        query.intents = vec![intent.intent];
        query.confidence = match resolved.entity_name() {
            Some(name) => {
                query.entities.names.push(name.to_string());
                (resolved.confidence() + intent.confidence) / 2.0
            }
            None => UNRESOLVED_SINGLE_CONFIDENCE,
        };
        query
    }

    fn resolve_name(&self, input: &str, context: Option<&ConversationContext>) -> Option<String> {
        self.resolver
            .resolve(input, context.and_then(|c| c.active_entity_id.as_ref()))
            .entity_name()
            .map(str::to_string)
    }

    fn fallback(&self, input: &str, context: Option<&ConversationContext>) -> StructuredQuery {
        let mut query = StructuredQuery::new(input, QueryType::SingleEntity, QuerySource::Fallback);
        query.entities.names.extend(self.resolve_name(input, context));
        query.entities.time_range = extract_time_range(&normalize(input));

        let guessed = self.classifier.classify(input, context);
        if !guessed.matched_keywords.is_empty() {
            query.intents.push(guessed.intent);
        }
        query.confidence = FALLBACK_QUERY_CONFIDENCE;
        query
    }
}

fn aggregation(input: &str, normalized: &str, mentioned: &[EntityResult]) -> StructuredQuery {
    let mut query = StructuredQuery::new(input, QueryType::Aggregation, QuerySource::Rules);
    let operation = OPERATION_WORDS
        .iter()
        .find(|(_, words)| contains_any(normalized, words))
        .map(|(operation, _)| *operation)
        .unwrap_or(AggregationOp::Count);
    let group_by = GROUP_BY_WORDS
        .iter()
        .find(|(_, words)| contains_any(normalized, words))
        .map(|(field, _)| (*field).to_string());

    query.aggregations = Some(AggregationSpec { operation: Some(operation), group_by });
    query.entities.names = entity_names(mentioned);
    query.intents = vec![Intent::DataQuery];
    query.confidence = AGGREGATION_CONFIDENCE;
    query
}

/// Fills what each query type implies but the earlier stages left out.
pub fn repair(mut query: StructuredQuery, context: Option<&ConversationContext>) -> StructuredQuery {
    let mut repairs = Vec::new();

    if query.entities.names.is_empty() {
        if let Some(name) = context.and_then(|c| c.active_entity_name.as_ref()) {
            query.entities.names.push(name.clone());
            query.entities.inherited = true;
            repairs.push("entity_inherited");
        }
    }
    if query.query_type == QueryType::Aggregation && query.aggregation_op().is_none() {
        let group_by = query.aggregations.take().and_then(|spec| spec.group_by);
        query.aggregations = Some(AggregationSpec { operation: Some(AggregationOp::Count), group_by });
        repairs.push("operation_defaulted");
    }
    if query.query_type == QueryType::Comparison && query.entities.comparison_target.is_none() {
        query.entities.comparison_target = Some(ComparisonTarget::PreviousPeriod);
        repairs.push("comparison_target_defaulted");
    }
    if query.intents.is_empty() {
        query.intents.push(Intent::StatusQuery);
        repairs.push("intent_defaulted");
    }

    if !repairs.is_empty() {
        debug!(event_name = "agent.structurer.repaired", repairs = ?repairs, "repaired structured query");
    }
    query
}

#[derive(Debug, Deserialize)]
struct QueryPayload {
    query_type: String,
    #[serde(default)]
    entities: Vec<String>,
    #[serde(default)]
    intents: Vec<String>,
    time_range: Option<String>,
    comparison_target: Option<String>,
    operation: Option<String>,
    group_by: Option<String>,
    #[serde(default)]
    filters: BTreeMap<String, String>,
    confidence: Option<f64>,
}

fn parse_llm_query(input: &str, content: &str) -> Result<StructuredQuery, RoutingError> {
    let payload = extract_json_payload(content, '{', '}')
        .ok_or_else(|| RoutingError::QueryParseFailed("no JSON object in reply".to_string()))?;
    let payload = serde_json::from_str::<QueryPayload>(payload)
        .map_err(|error| RoutingError::QueryParseFailed(error.to_string()))?;
    let query_type = QueryType::parse(&payload.query_type).ok_or_else(|| {
        RoutingError::QueryParseFailed(format!("unknown query_type `{}`", payload.query_type))
    })?;

    let mut query = StructuredQuery::new(input, query_type, QuerySource::Llm);
    query.entities.names = payload
        .entities
        .iter()
        .map(|name| clean_entity_name(name))
        .filter(|name| !name.is_empty())
        .collect();
    query.entities.time_range = payload.time_range.filter(|range| !range.trim().is_empty());
    query.entities.comparison_target =
        payload.comparison_target.as_deref().and_then(ComparisonTarget::parse);
    query.intents = payload.intents.iter().filter_map(|intent| Intent::parse(intent)).collect();
    query.intents.dedup();
    query.filters = payload.filters;
    if query_type == QueryType::Aggregation || payload.operation.is_some() {
        query.aggregations = Some(AggregationSpec {
            operation: payload.operation.as_deref().and_then(AggregationOp::parse),
            group_by: payload.group_by.filter(|field| !field.trim().is_empty()),
        });
    }
    query.confidence = payload.confidence.unwrap_or(LLM_DEFAULT_CONFIDENCE).clamp(0.0, 1.0);
    Ok(query)
}

fn clean_entity_name(name: &str) -> String {
    name.trim().trim_end_matches(['的', '？', '?', '。']).trim().to_string()
}

fn entity_names(results: &[EntityResult]) -> Vec<String> {
    results.iter().filter_map(|result| result.entity_name().map(str::to_string)).collect()
}

fn contains_any(text: &str, words: &[&str]) -> bool {
    words.iter().any(|word| text.contains(word))
}

pub fn extract_time_range(normalized: &str) -> Option<String> {
    if let Some(days) = recent_days(normalized) {
        return Some(format!("最近{days}天"));
    }
    FIXED_TIME_RANGES
        .iter()
        .find(|(_, words)| contains_any(normalized, words))
        .map(|(canonical, _)| (*canonical).to_string())
}

/// `最近N天` / `近N天` with ASCII digits.
fn recent_days(normalized: &str) -> Option<u32> {
    for prefix in ["最近", "近"] {
        for (start, _) in normalized.match_indices(prefix) {
            let rest = &normalized[start + prefix.len()..];
            let digits = rest.chars().take_while(char::is_ascii_digit).collect::<String>();
            if !digits.is_empty() && rest[digits.len()..].starts_with('天') {
                if let Ok(days) = digits.parse() {
                    return Some(days);
                }
            }
        }
    }
    None
}

pub fn extract_filters(normalized: &str) -> BTreeMap<String, String> {
    let mut filters = BTreeMap::new();
    if normalized.contains("低风险") {
        filters.insert("risk_level".to_string(), "low".to_string());
    } else if normalized.contains("中风险") {
        filters.insert("risk_level".to_string(), "medium".to_string());
    } else if normalized.contains("风险") && !normalized.contains("风险等级") {
        filters.insert("risk_level".to_string(), "high".to_string());
    }
    if contains_any(normalized, &["不健康", "预警", "亚健康"]) {
        filters.insert("health_status".to_string(), "warning".to_string());
    } else if normalized.contains("健康") && !contains_any(normalized, &["健康度", "健康状态", "健康分布"]) {
        filters.insert("health_status".to_string(), "healthy".to_string());
    }
    filters
}
