use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The business object a conversation revolves around (a merchant, a store).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

impl Entity {
    pub fn new(id: impl Into<String>, name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: EntityId::new(id),
            name: name.into(),
            category: category.into(),
            aliases: Vec::new(),
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn with_metric(mut self, key: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(key.into(), value);
        self
    }

    pub fn metric(&self, key: &str) -> Option<f64> {
        self.metrics.get(key).copied()
    }

    /// Display name first, then aliases.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    SuffixStripped,
    Keyword,
    Partial,
    ContextInherited,
}

impl MatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::SuffixStripped => "suffix_stripped",
            Self::Keyword => "keyword",
            Self::Partial => "partial",
            Self::ContextInherited => "context_inherited",
        }
    }
}

/// Outcome of entity resolution. A matched result always carries the id of a
/// registry entity; the only way to build one is [`EntityResult::matched`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityResult {
    entity_id: Option<EntityId>,
    entity_name: Option<String>,
    confidence: f64,
    matched: bool,
    match_kind: Option<MatchKind>,
}

impl EntityResult {
    pub fn matched(entity: &Entity, confidence: f64, kind: MatchKind) -> Self {
        Self {
            entity_id: Some(entity.id.clone()),
            entity_name: Some(entity.name.clone()),
            confidence: confidence.clamp(0.0, 1.0),
            matched: true,
            match_kind: Some(kind),
        }
    }

    pub fn unmatched() -> Self {
        Self { entity_id: None, entity_name: None, confidence: 0.0, matched: false, match_kind: None }
    }

    pub fn entity_id(&self) -> Option<&EntityId> {
        self.entity_id.as_ref()
    }

    pub fn entity_name(&self) -> Option<&str> {
        self.entity_name.as_deref()
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn is_matched(&self) -> bool {
        self.matched
    }

    pub fn match_kind(&self) -> Option<MatchKind> {
        self.match_kind
    }
}
