//! Registry-wide answers: aggregation questions that name no single entity,
//! and side-by-side comparisons of entities the user named together.

use std::collections::BTreeMap;
use std::sync::Arc;

use routewise_core::domain::entity::Entity;
use routewise_core::domain::query::{AggregationOp, StructuredQuery};
use routewise_core::errors::SkillError;
use routewise_core::registry::EntityRegistry;

use super::builtin::{
    health_label, metric_label, AVG_TICKET, HEALTH_SCORE, MONTHLY_REVENUE, ORDER_COUNT, RATING,
    REVENUE_CHANGE_PCT,
};
use super::{RiskScanner, Severity, SkillOutput};

const HEALTHY_SCORE: f64 = 80.0;

/// Metric named by the question; health score when none is.
const METRIC_WORDS: &[(&str, &[&str])] = &[
    (MONTHLY_REVENUE, &["营业额", "销售额", "流水", "gmv"]),
    (AVG_TICKET, &["客单价"]),
    (ORDER_COUNT, &["订单"]),
    (RATING, &["评分"]),
    (HEALTH_SCORE, &["健康度", "健康分"]),
];

pub struct RegistryAggregator {
    registry: Arc<dyn EntityRegistry>,
    scanner: Arc<dyn RiskScanner>,
}

impl RegistryAggregator {
    pub fn new(registry: Arc<dyn EntityRegistry>, scanner: Arc<dyn RiskScanner>) -> Self {
        Self { registry, scanner }
    }

    /// Entities passing every filter of `query`, in registry order. Unknown
    /// filter keys do not narrow the population.
    pub fn matching(&self, query: &StructuredQuery) -> Vec<&Entity> {
        self.registry
            .all()
            .iter()
            .filter(|entity| self.passes(entity, &query.filters))
            .collect()
    }

    pub fn aggregate(&self, query: &StructuredQuery) -> SkillOutput {
        let population = self.matching(query);
        let scope = scope_label(&query.filters);
        let operation = query.aggregation_op().unwrap_or(AggregationOp::Count);
        let group_by = query.aggregations.as_ref().and_then(|spec| spec.group_by.as_deref());

        if operation == AggregationOp::Count {
            return self.count(&scope, &population, group_by);
        }
        let metric = metric_for(&query.original_input);
        let label = metric_label(metric);
        let Some(field) = group_by else {
            let values = values_of(&population, metric);
            let summary = match measure(operation, &values) {
                Some(text) => format!("{scope}商户{label}{text}（样本 {} 家）", values.len()),
                None => format!("{scope}商户暂无{label}数据"),
            };
            return SkillOutput::new(summary);
        };

        self.groups(&population, field).into_iter().fold(
            SkillOutput::new(format!("{scope}商户{label}按{}统计", field_label(field))),
            |output, (group, members)| {
                let values = values_of(&members, metric);
                let text = measure(operation, &values).unwrap_or_else(|| "暂无数据".to_string());
                output.with_detail(format!("{group}: {text}（{} 家）", values.len()))
            },
        )
    }

    fn count(&self, scope: &str, population: &[&Entity], group_by: Option<&str>) -> SkillOutput {
        let summary = format!("{scope}商户共 {} 家", population.len());
        match group_by {
            Some(field) => self.groups(population, field).into_iter().fold(
                SkillOutput::new(format!("{summary}，按{}分布", field_label(field))),
                |output, (group, members)| {
                    output.with_detail(format!("{group}: {} 家（{}）", members.len(), names(&members)))
                },
            ),
            None => population
                .iter()
                .fold(SkillOutput::new(summary), |output, entity| output.with_detail(entity.name.clone())),
        }
    }

    fn groups<'a>(&self, population: &[&'a Entity], field: &str) -> BTreeMap<String, Vec<&'a Entity>> {
        let mut groups = BTreeMap::<String, Vec<&Entity>>::new();
        for entity in population.iter().copied() {
            groups.entry(self.group_key(entity, field)).or_default().push(entity);
        }
        groups
    }

    fn group_key(&self, entity: &Entity, field: &str) -> String {
        match field {
            "category" if entity.category.is_empty() => "未分类".to_string(),
            "category" => entity.category.clone(),
            "health_status" => entity
                .metric(HEALTH_SCORE)
                .map(|score| health_label(score).to_string())
                .unwrap_or_else(|| "无数据".to_string()),
            "risk_level" => format!("{}风险", risk_label(self.risk_level(entity))),
            _ => "全部".to_string(),
        }
    }

    fn passes(&self, entity: &Entity, filters: &BTreeMap<String, String>) -> bool {
        filters.iter().all(|(key, value)| match key.as_str() {
            "risk_level" => self.risk_level(entity) == value.as_str(),
            "health_status" => health_status(entity) == Some(value.as_str()),
            "category" => entity.category == *value,
            _ => true,
        })
    }

    /// Highest severity among the entity's risk factors; `low` when clean.
    fn risk_level(&self, entity: &Entity) -> &'static str {
        match self.scanner.scan(entity).iter().map(|factor| factor.severity).max() {
            Some(Severity::High) => "high",
            Some(Severity::Medium) => "medium",
            Some(Severity::Low) | None => "low",
        }
    }
}

/// Ranks named entities by health score. Needs at least two that carry one.
pub fn compare_named(entities: &[Entity]) -> Result<SkillOutput, SkillError> {
    let mut scored = entities
        .iter()
        .filter_map(|entity| entity.metric(HEALTH_SCORE).map(|score| (entity, score)))
        .collect::<Vec<_>>();
    if scored.len() < 2 {
        return Err(SkillError::Failed {
            skill: "named_comparison".to_string(),
            message: "fewer than two named entities carry a health score".to_string(),
        });
    }
    scored.sort_by(|left, right| {
        right.1.total_cmp(&left.1).then_with(|| left.0.name.cmp(&right.0.name))
    });

    let (leader, top) = scored[0];
    let output =
        SkillOutput::new(format!("{}健康度 {top:.0}，在 {} 家中最高", leader.name, scored.len()));
    Ok(scored.iter().fold(output, |output, (entity, score)| {
        let mut line = format!("{}: 健康度 {score:.0}", entity.name);
        for key in [MONTHLY_REVENUE, REVENUE_CHANGE_PCT] {
            if let Some(value) = entity.metric(key) {
                line.push_str(&format!("，{} {value}", metric_label(key)));
            }
        }
        output.with_detail(line)
    }))
}

fn metric_for(input: &str) -> &'static str {
    let lowered = input.to_lowercase();
    METRIC_WORDS
        .iter()
        .find(|(_, words)| words.iter().any(|word| lowered.contains(word)))
        .map(|(metric, _)| *metric)
        .unwrap_or(HEALTH_SCORE)
}

fn values_of<'a>(entities: &[&'a Entity], metric: &str) -> Vec<(&'a Entity, f64)> {
    entities.iter().filter_map(|entity| entity.metric(metric).map(|value| (*entity, value))).collect()
}

fn measure(operation: AggregationOp, values: &[(&Entity, f64)]) -> Option<String> {
    if values.is_empty() {
        return None;
    }
    let total = values.iter().map(|(_, value)| value).sum::<f64>();
    let text = match operation {
        AggregationOp::Count => format!("{} 家", values.len()),
        AggregationOp::Sum => format!("合计 {total:.1}"),
        AggregationOp::Average => format!("平均 {:.1}", total / values.len() as f64),
        AggregationOp::Max => {
            let (entity, value) = values.iter().max_by(|left, right| left.1.total_cmp(&right.1))?;
            format!("最高为{} {value}", entity.name)
        }
        AggregationOp::Min => {
            let (entity, value) = values.iter().min_by(|left, right| left.1.total_cmp(&right.1))?;
            format!("最低为{} {value}", entity.name)
        }
    };
    Some(text)
}

fn health_status(entity: &Entity) -> Option<&'static str> {
    entity.metric(HEALTH_SCORE).map(|score| if score >= HEALTHY_SCORE { "healthy" } else { "warning" })
}

fn risk_label(level: &str) -> &str {
    match level {
        "high" => "高",
        "medium" => "中",
        "low" => "低",
        other => other,
    }
}

fn field_label(field: &str) -> &str {
    match field {
        "category" => "品类",
        "health_status" => "健康状态",
        "risk_level" => "风险等级",
        other => other,
    }
}

/// `高风险`, `非健康火锅`: the filters as a prefix for `商户`.
fn scope_label(filters: &BTreeMap<String, String>) -> String {
    let mut scope = String::new();
    if let Some(level) = filters.get("risk_level") {
        scope.push_str(risk_label(level));
        scope.push_str("风险");
    }
    match filters.get("health_status").map(String::as_str) {
        Some("healthy") => scope.push_str("健康"),
        Some("warning") => scope.push_str("非健康"),
        _ => {}
    }
    if let Some(category) = filters.get("category") {
        scope.push_str(category);
    }
    scope
}

fn names(entities: &[&Entity]) -> String {
    entities.iter().map(|entity| entity.name.as_str()).collect::<Vec<_>>().join("、")
}
