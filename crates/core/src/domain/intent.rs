use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    StatusQuery,
    DataQuery,
    Diagnosis,
    Recommendation,
    TrendAnalysis,
    Comparison,
    GeneralChat,
}

impl Intent {
    /// Declaration order doubles as the tie-break order when ranking.
    pub const ALL: [Intent; 7] = [
        Intent::StatusQuery,
        Intent::DataQuery,
        Intent::Diagnosis,
        Intent::Recommendation,
        Intent::TrendAnalysis,
        Intent::Comparison,
        Intent::GeneralChat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StatusQuery => "status_query",
            Self::DataQuery => "data_query",
            Self::Diagnosis => "diagnosis",
            Self::Recommendation => "recommendation",
            Self::TrendAnalysis => "trend_analysis",
            Self::Comparison => "comparison",
            Self::GeneralChat => "general_chat",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "status_query" | "status" => Some(Self::StatusQuery),
            "data_query" | "data" => Some(Self::DataQuery),
            "diagnosis" => Some(Self::Diagnosis),
            "recommendation" => Some(Self::Recommendation),
            "trend_analysis" | "trend" => Some(Self::TrendAnalysis),
            "comparison" => Some(Self::Comparison),
            "general_chat" | "chat" => Some(Self::GeneralChat),
            _ => None,
        }
    }

    /// Intents that typically continue a thread about an already-named entity.
    pub fn is_follow_up(&self) -> bool {
        matches!(
            self,
            Self::Diagnosis
                | Self::Recommendation
                | Self::DataQuery
                | Self::TrendAnalysis
                | Self::Comparison
        )
    }

    pub fn requires_entity(&self) -> bool {
        !matches!(self, Self::GeneralChat)
    }

    /// Intents whose phrasing benefits from a structured query.
    pub fn is_analytic(&self) -> bool {
        matches!(self, Self::DataQuery | Self::TrendAnalysis | Self::Comparison)
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Intent {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value).ok_or_else(|| format!("unknown intent `{}`", value.trim()))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntentResult {
    pub intent: Intent,
    pub confidence: f64,
    pub matched_keywords: BTreeSet<String>,
}

impl IntentResult {
    pub fn new(intent: Intent, confidence: f64, matched_keywords: BTreeSet<String>) -> Self {
        Self { intent, confidence: clamp_unit(confidence), matched_keywords }
    }

    pub fn fallback(confidence: f64) -> Self {
        Self::new(Intent::GeneralChat, confidence, BTreeSet::new())
    }
}

/// One element of a multi-intent classification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RankedIntent {
    pub intent: Intent,
    pub confidence: f64,
    pub reason: String,
}

impl RankedIntent {
    pub fn new(intent: Intent, confidence: f64, reason: impl Into<String>) -> Self {
        Self { intent, confidence: clamp_unit(confidence), reason: reason.into() }
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
