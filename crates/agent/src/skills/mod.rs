//! Local, deterministic analytics the runtime can always fall back to.

pub mod aggregate;
pub mod builtin;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use routewise_core::domain::entity::Entity;
use routewise_core::domain::intent::Intent;
use routewise_core::errors::SkillError;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillOutput {
    pub summary: String,
    pub details: Vec<String>,
    pub suggested_actions: Vec<String>,
}

impl SkillOutput {
    pub fn new(summary: impl Into<String>) -> Self {
        Self { summary: summary.into(), details: Vec::new(), suggested_actions: Vec::new() }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.details.push(detail.into());
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.suggested_actions.push(action.into());
        self
    }

    /// Plain-text rendering used as response content.
    pub fn render(&self) -> String {
        let mut lines = vec![self.summary.clone()];
        lines.extend(self.details.iter().map(|detail| format!("- {detail}")));
        lines.join("\n")
    }
}

#[async_trait]
pub trait Skill: Send + Sync {
    fn name(&self) -> &'static str;

    fn intent(&self) -> Intent;

    async fn execute(&self, entity: &Entity) -> Result<SkillOutput, SkillError>;
}

#[derive(Default)]
pub struct SkillRegistry {
    skills: HashMap<Intent, Arc<dyn Skill>>,
}

impl SkillRegistry {
    pub fn register<S>(&mut self, skill: S)
    where
        S: Skill + 'static,
    {
        self.skills.insert(skill.intent(), Arc::new(skill));
    }

    pub fn register_shared(&mut self, skill: Arc<dyn Skill>) {
        self.skills.insert(skill.intent(), skill);
    }

    pub fn get(&self, intent: Intent) -> Option<Arc<dyn Skill>> {
        self.skills.get(&intent).cloned()
    }

    /// The skill for `intent`, or the status skill when none is registered.
    pub fn resolve(&self, intent: Intent) -> Result<Arc<dyn Skill>, SkillError> {
        self.get(intent)
            .or_else(|| self.get(Intent::StatusQuery))
            .ok_or_else(|| SkillError::NotRegistered(intent.as_str().to_string()))
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub code: String,
    pub description: String,
    pub severity: Severity,
}

pub trait RiskScanner: Send + Sync {
    fn scan(&self, entity: &Entity) -> Vec<RiskFactor>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReferenceCase {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub risk_codes: Vec<String>,
    pub lesson: String,
}

pub trait CaseLibrary: Send + Sync {
    fn best_matches(&self, entity: &Entity, limit: usize) -> Vec<ReferenceCase>;
}
