use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::intent::Intent;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    SingleEntity,
    Aggregation,
    Comparison,
    TrendAnalysis,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SingleEntity => "single_entity",
            Self::Aggregation => "aggregation",
            Self::Comparison => "comparison",
            Self::TrendAnalysis => "trend_analysis",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "single_entity" => Some(Self::SingleEntity),
            "aggregation" => Some(Self::Aggregation),
            "comparison" => Some(Self::Comparison),
            "trend_analysis" | "trend" => Some(Self::TrendAnalysis),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationOp {
    Count,
    Sum,
    Average,
    Max,
    Min,
}

impl AggregationOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Average => "average",
            Self::Max => "max",
            Self::Min => "min",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "count" => Some(Self::Count),
            "sum" => Some(Self::Sum),
            "average" | "avg" | "mean" => Some(Self::Average),
            "max" => Some(Self::Max),
            "min" => Some(Self::Min),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonTarget {
    PreviousPeriod,
    CategoryAverage,
    PeerEntities,
}

impl ComparisonTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreviousPeriod => "previous_period",
            Self::CategoryAverage => "category_average",
            Self::PeerEntities => "peer_entities",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "previous_period" => Some(Self::PreviousPeriod),
            "category_average" | "industry_average" => Some(Self::CategoryAverage),
            "peer_entities" | "peers" | "other_entities" => Some(Self::PeerEntities),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuerySource {
    Rules,
    Llm,
    Fallback,
}

impl QuerySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rules => "rules",
            Self::Llm => "llm",
            Self::Fallback => "fallback",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryEntities {
    pub names: Vec<String>,
    pub time_range: Option<String>,
    pub comparison_target: Option<ComparisonTarget>,
    /// Set when `names` was filled from the active context entity rather
    /// than extracted from the input.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub inherited: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggregationSpec {
    pub operation: Option<AggregationOp>,
    pub group_by: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StructuredQuery {
    pub original_input: String,
    pub query_type: QueryType,
    pub entities: QueryEntities,
    pub intents: Vec<Intent>,
    pub filters: BTreeMap<String, String>,
    pub aggregations: Option<AggregationSpec>,
    pub confidence: f64,
    pub source: QuerySource,
}

impl StructuredQuery {
    pub fn new(original_input: impl Into<String>, query_type: QueryType, source: QuerySource) -> Self {
        Self {
            original_input: original_input.into(),
            query_type,
            entities: QueryEntities::default(),
            intents: Vec::new(),
            filters: BTreeMap::new(),
            aggregations: None,
            confidence: 0.0,
            source,
        }
    }

    pub fn aggregation_op(&self) -> Option<AggregationOp> {
        self.aggregations.as_ref().and_then(|spec| spec.operation)
    }

    /// True when every type-specific field the query type implies is present.
    pub fn is_well_formed(&self) -> bool {
        match self.query_type {
            QueryType::Aggregation => self.aggregation_op().is_some(),
            QueryType::Comparison => self.entities.comparison_target.is_some(),
            QueryType::SingleEntity | QueryType::TrendAnalysis => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AggregationOp, AggregationSpec, QuerySource, QueryType, StructuredQuery};

    #[test]
    fn aggregation_without_operation_is_not_well_formed() {
        let mut query = StructuredQuery::new("有多少家", QueryType::Aggregation, QuerySource::Rules);
        assert!(!query.is_well_formed());

        query.aggregations = Some(AggregationSpec { operation: Some(AggregationOp::Count), group_by: None });
        assert!(query.is_well_formed());
    }

    #[test]
    fn query_type_parse_accepts_wire_names() {
        assert_eq!(QueryType::parse("comparison"), Some(QueryType::Comparison));
        assert_eq!(QueryType::parse("trend"), Some(QueryType::TrendAnalysis));
        assert_eq!(QueryType::parse("ranking"), None);
    }
}
