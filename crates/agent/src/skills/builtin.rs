//! Metric-threshold skills over `Entity::metrics`, plus the demo data the CLI
//! ships with.

use std::sync::Arc;

use async_trait::async_trait;
use routewise_core::domain::entity::Entity;
use routewise_core::domain::intent::Intent;
use routewise_core::errors::SkillError;
use routewise_core::registry::EntityRegistry;

use super::{
    CaseLibrary, ReferenceCase, RiskFactor, RiskScanner, Severity, Skill, SkillOutput,
    SkillRegistry,
};

pub const HEALTH_SCORE: &str = "health_score";
pub const MONTHLY_REVENUE: &str = "monthly_revenue";
pub const REVENUE_CHANGE_PCT: &str = "revenue_change_pct";
pub const ORDER_COUNT: &str = "order_count";
pub const AVG_TICKET: &str = "avg_ticket";
pub const RATING: &str = "rating";
pub const COMPLAINT_RATE: &str = "complaint_rate";
pub const REPEAT_RATE: &str = "repeat_rate";
pub const COST_RATIO: &str = "cost_ratio";
pub const STAFF_TURNOVER: &str = "staff_turnover";

pub(crate) fn metric_label(key: &str) -> &str {
    match key {
        HEALTH_SCORE => "健康度",
        MONTHLY_REVENUE => "月营业额(万元)",
        REVENUE_CHANGE_PCT => "营业额环比(%)",
        ORDER_COUNT => "月订单量",
        AVG_TICKET => "客单价(元)",
        RATING => "评分",
        COMPLAINT_RATE => "投诉率",
        REPEAT_RATE => "复购率",
        COST_RATIO => "成本占比",
        STAFF_TURNOVER => "员工流失率",
        other => other,
    }
}

fn required(entity: &Entity, key: &str) -> Result<f64, SkillError> {
    entity.metric(key).ok_or_else(|| SkillError::MissingMetrics(entity.name.clone()))
}

pub(crate) fn health_label(score: f64) -> &'static str {
    if score >= 80.0 {
        "健康"
    } else if score >= 60.0 {
        "一般"
    } else {
        "预警"
    }
}

fn severity_label(severity: Severity) -> &'static str {
    match severity {
        Severity::High => "高",
        Severity::Medium => "中",
        Severity::Low => "低",
    }
}

fn remedy_for(code: &str) -> &'static str {
    match code {
        "low_health" => "安排经营复盘，优先处理高风险项",
        "revenue_decline" => "排查客流与转化，针对下滑时段做促销",
        "low_rating" => "梳理差评原因，改进出品与服务",
        "complaints_high" => "建立投诉日清机制，跟进每一条投诉",
        "weak_retention" => "上线会员储值与回访，提升复购",
        "cost_pressure" => "复核采购与损耗，优化菜单毛利结构",
        "staff_turnover" => "优化排班与激励，稳定核心员工",
        _ => "持续关注该指标",
    }
}

/// Threshold scan over the standard metric keys. Missing metrics are skipped.
#[derive(Clone, Debug, Default)]
pub struct MetricRiskScanner;

impl RiskScanner for MetricRiskScanner {
    fn scan(&self, entity: &Entity) -> Vec<RiskFactor> {
        let mut factors = Vec::new();
        let mut flag = |code: &str, description: String, severity: Severity| {
            factors.push(RiskFactor { code: code.to_string(), description, severity });
        };

        if let Some(score) = entity.metric(HEALTH_SCORE).filter(|score| *score < 60.0) {
            flag("low_health", format!("健康度仅 {score:.0}"), Severity::High);
        }
        if let Some(change) = entity.metric(REVENUE_CHANGE_PCT).filter(|change| *change <= -10.0) {
            let severity = if change <= -20.0 { Severity::High } else { Severity::Medium };
            flag("revenue_decline", format!("营业额环比下降 {:.1}%", change.abs()), severity);
        }
        if let Some(rating) = entity.metric(RATING).filter(|rating| *rating < 4.0) {
            flag("low_rating", format!("评分 {rating:.1} 低于 4.0"), Severity::Medium);
        }
        if let Some(rate) = entity.metric(COMPLAINT_RATE).filter(|rate| *rate > 0.05) {
            flag("complaints_high", format!("投诉率 {:.1}%", rate * 100.0), Severity::High);
        }
        if let Some(rate) = entity.metric(REPEAT_RATE).filter(|rate| *rate < 0.25) {
            flag("weak_retention", format!("复购率仅 {:.0}%", rate * 100.0), Severity::Medium);
        }
        if let Some(ratio) = entity.metric(COST_RATIO).filter(|ratio| *ratio > 0.45) {
            flag("cost_pressure", format!("成本占比 {:.0}%", ratio * 100.0), Severity::Medium);
        }
        if let Some(rate) = entity.metric(STAFF_TURNOVER).filter(|rate| *rate > 0.3) {
            flag("staff_turnover", format!("员工流失率 {:.0}%", rate * 100.0), Severity::Low);
        }

        factors.sort_by(|left, right| right.severity.cmp(&left.severity));
        factors
    }
}

pub struct StatusSkill;

#[async_trait]
impl Skill for StatusSkill {
    fn name(&self) -> &'static str {
        "status_overview"
    }

    fn intent(&self) -> Intent {
        Intent::StatusQuery
    }

    async fn execute(&self, entity: &Entity) -> Result<SkillOutput, SkillError> {
        let score = required(entity, HEALTH_SCORE)?;
        let mut output = SkillOutput::new(format!(
            "{}整体经营{}，健康度 {score:.0}",
            entity.name,
            health_label(score)
        ));
        for key in [MONTHLY_REVENUE, REVENUE_CHANGE_PCT, RATING] {
            if let Some(value) = entity.metric(key) {
                output = output.with_detail(format!("{}: {value}", metric_label(key)));
            }
        }
        if score < 80.0 {
            output = output.with_action(format!("查看{}的风险诊断", entity.name));
        }
        Ok(output)
    }
}

pub struct DataSkill;

#[async_trait]
impl Skill for DataSkill {
    fn name(&self) -> &'static str {
        "metric_listing"
    }

    fn intent(&self) -> Intent {
        Intent::DataQuery
    }

    async fn execute(&self, entity: &Entity) -> Result<SkillOutput, SkillError> {
        if entity.metrics.is_empty() {
            return Err(SkillError::MissingMetrics(entity.name.clone()));
        }
        Ok(entity.metrics.iter().fold(
            SkillOutput::new(format!("{}的核心经营数据", entity.name)),
            |output, (key, value)| output.with_detail(format!("{}: {value}", metric_label(key))),
        ))
    }
}

pub struct DiagnosisSkill {
    scanner: Arc<dyn RiskScanner>,
}

impl DiagnosisSkill {
    pub fn new(scanner: Arc<dyn RiskScanner>) -> Self {
        Self { scanner }
    }
}

#[async_trait]
impl Skill for DiagnosisSkill {
    fn name(&self) -> &'static str {
        "risk_diagnosis"
    }

    fn intent(&self) -> Intent {
        Intent::Diagnosis
    }

    async fn execute(&self, entity: &Entity) -> Result<SkillOutput, SkillError> {
        let factors = self.scanner.scan(entity);
        if factors.is_empty() {
            return Ok(SkillOutput::new(format!("{}暂未发现明显风险", entity.name)));
        }
        Ok(factors.iter().fold(
            SkillOutput::new(format!("{}发现 {} 项风险", entity.name, factors.len())),
            |output, factor| {
                output
                    .with_detail(format!("[{}] {}", severity_label(factor.severity), factor.description))
                    .with_action(remedy_for(&factor.code))
            },
        ))
    }
}

pub struct RecommendationSkill {
    scanner: Arc<dyn RiskScanner>,
}

impl RecommendationSkill {
    pub fn new(scanner: Arc<dyn RiskScanner>) -> Self {
        Self { scanner }
    }
}

#[async_trait]
impl Skill for RecommendationSkill {
    fn name(&self) -> &'static str {
        "improvement_plan"
    }

    fn intent(&self) -> Intent {
        Intent::Recommendation
    }

    async fn execute(&self, entity: &Entity) -> Result<SkillOutput, SkillError> {
        let factors = self.scanner.scan(entity);
        if factors.is_empty() {
            return Ok(SkillOutput::new(format!("{}经营稳健，建议保持现有节奏", entity.name))
                .with_detail("持续跟踪健康度与复购率")
                .with_action("每月复盘一次核心指标"));
        }
        Ok(factors.iter().enumerate().fold(
            SkillOutput::new(format!("针对{}的改进建议", entity.name)),
            |output, (index, factor)| {
                let remedy = remedy_for(&factor.code);
                output.with_detail(format!("{}. {remedy}", index + 1)).with_action(remedy)
            },
        ))
    }
}

pub struct TrendSkill;

#[async_trait]
impl Skill for TrendSkill {
    fn name(&self) -> &'static str {
        "revenue_trend"
    }

    fn intent(&self) -> Intent {
        Intent::TrendAnalysis
    }

    async fn execute(&self, entity: &Entity) -> Result<SkillOutput, SkillError> {
        let change = required(entity, REVENUE_CHANGE_PCT)?;
        let direction = if change >= 0.0 { "上升" } else { "下降" };
        let mut output = SkillOutput::new(format!(
            "{}营业额环比{direction} {:.1}%",
            entity.name,
            change.abs()
        ));
        if let Some(revenue) = entity.metric(MONTHLY_REVENUE) {
            output = output.with_detail(format!("{}: {revenue}", metric_label(MONTHLY_REVENUE)));
        }
        if let Some(orders) = entity.metric(ORDER_COUNT) {
            output = output.with_detail(format!("{}: {orders}", metric_label(ORDER_COUNT)));
        }
        if change < 0.0 {
            output = output.with_action(remedy_for("revenue_decline"));
        }
        Ok(output)
    }
}

/// Health score against the average of same-category peers, or of every
/// other entity when the category has none.
pub struct ComparisonSkill {
    registry: Arc<dyn EntityRegistry>,
}

impl ComparisonSkill {
    pub fn new(registry: Arc<dyn EntityRegistry>) -> Self {
        Self { registry }
    }

    fn peer_scores(&self, entity: &Entity, same_category: bool) -> Vec<f64> {
        self.registry
            .all()
            .iter()
            .filter(|peer| peer.id != entity.id)
            .filter(|peer| !same_category || peer.category == entity.category)
            .filter_map(|peer| peer.metric(HEALTH_SCORE))
            .collect()
    }
}

#[async_trait]
impl Skill for ComparisonSkill {
    fn name(&self) -> &'static str {
        "peer_comparison"
    }

    fn intent(&self) -> Intent {
        Intent::Comparison
    }

    async fn execute(&self, entity: &Entity) -> Result<SkillOutput, SkillError> {
        let score = required(entity, HEALTH_SCORE)?;
        let (scores, scope) = match self.peer_scores(entity, true) {
            scores if !scores.is_empty() => (scores, "同品类"),
            _ => (self.peer_scores(entity, false), "全部商户"),
        };
        if scores.is_empty() {
            return Err(SkillError::Failed {
                skill: self.name().to_string(),
                message: "no peers to compare against".to_string(),
            });
        }

        let average = scores.iter().sum::<f64>() / scores.len() as f64;
        let verdict = if score >= average { "高于" } else { "低于" };
        Ok(SkillOutput::new(format!(
            "{}健康度 {score:.0}，{verdict}{scope}平均 {average:.1}",
            entity.name
        ))
        .with_detail(format!("对比样本 {} 家", scores.len())))
    }
}

/// Cases ranked by shared risk codes, with a category match as tiebreaker.
pub struct StaticCaseLibrary {
    cases: Vec<ReferenceCase>,
    scanner: Arc<dyn RiskScanner>,
}

impl StaticCaseLibrary {
    pub fn new(cases: Vec<ReferenceCase>, scanner: Arc<dyn RiskScanner>) -> Self {
        Self { cases, scanner }
    }
}

impl CaseLibrary for StaticCaseLibrary {
    fn best_matches(&self, entity: &Entity, limit: usize) -> Vec<ReferenceCase> {
        let codes = self.scanner.scan(entity).into_iter().map(|factor| factor.code).collect::<Vec<_>>();
        let mut scored = self
            .cases
            .iter()
            .map(|case| {
                let overlap = case.risk_codes.iter().filter(|code| codes.contains(code)).count();
                let category = usize::from(!case.category.is_empty() && case.category == entity.category);
                (overlap * 2 + category, case)
            })
            .filter(|(score, _)| *score > 0)
            .collect::<Vec<_>>();
        scored.sort_by(|left, right| right.0.cmp(&left.0).then_with(|| left.1.id.cmp(&right.1.id)));
        scored.into_iter().take(limit).map(|(_, case)| case.clone()).collect()
    }
}

pub fn default_skills(
    registry: Arc<dyn EntityRegistry>,
    scanner: Arc<dyn RiskScanner>,
) -> SkillRegistry {
    let mut skills = SkillRegistry::default();
    skills.register(StatusSkill);
    skills.register(DataSkill);
    skills.register(DiagnosisSkill::new(Arc::clone(&scanner)));
    skills.register(RecommendationSkill::new(scanner));
    skills.register(TrendSkill);
    skills.register(ComparisonSkill::new(registry));
    skills
}

pub fn demo_entities() -> Vec<Entity> {
    vec![
        Entity::new("m-001", "海底捞火锅", "火锅")
            .with_metric(HEALTH_SCORE, 82.0)
            .with_metric(MONTHLY_REVENUE, 320.0)
            .with_metric(REVENUE_CHANGE_PCT, 3.5)
            .with_metric(ORDER_COUNT, 15800.0)
            .with_metric(AVG_TICKET, 128.0)
            .with_metric(RATING, 4.6)
            .with_metric(COMPLAINT_RATE, 0.02)
            .with_metric(REPEAT_RATE, 0.45)
            .with_metric(COST_RATIO, 0.38)
            .with_metric(STAFF_TURNOVER, 0.2),
        Entity::new("m-002", "喜茶", "茶饮")
            .with_alias("HeyTea")
            .with_metric(HEALTH_SCORE, 88.0)
            .with_metric(MONTHLY_REVENUE, 210.0)
            .with_metric(REVENUE_CHANGE_PCT, 6.2)
            .with_metric(ORDER_COUNT, 42000.0)
            .with_metric(RATING, 4.7)
            .with_metric(REPEAT_RATE, 0.52),
        Entity::new("m-003", "蜀大侠火锅", "火锅")
            .with_metric(HEALTH_SCORE, 52.0)
            .with_metric(MONTHLY_REVENUE, 96.0)
            .with_metric(REVENUE_CHANGE_PCT, -22.0)
            .with_metric(ORDER_COUNT, 5100.0)
            .with_metric(RATING, 3.7)
            .with_metric(COMPLAINT_RATE, 0.08)
            .with_metric(REPEAT_RATE, 0.18)
            .with_metric(COST_RATIO, 0.5)
            .with_metric(STAFF_TURNOVER, 0.42),
        Entity::new("m-004", "湘味小厨", "湘菜")
            .with_metric(HEALTH_SCORE, 71.0)
            .with_metric(MONTHLY_REVENUE, 58.0)
            .with_metric(REVENUE_CHANGE_PCT, -12.0)
            .with_metric(RATING, 4.2)
            .with_metric(COST_RATIO, 0.47),
        Entity::new("m-005", "湘味小馆", "湘菜")
            .with_metric(HEALTH_SCORE, 66.0)
            .with_metric(MONTHLY_REVENUE, 41.0)
            .with_metric(REVENUE_CHANGE_PCT, 1.0)
            .with_metric(RATING, 3.9),
        Entity::new("m-006", "瑞幸咖啡", "咖啡")
            .with_alias("luckin")
            .with_metric(HEALTH_SCORE, 79.0)
            .with_metric(MONTHLY_REVENUE, 150.0)
            .with_metric(REVENUE_CHANGE_PCT, -4.0)
            .with_metric(REPEAT_RATE, 0.38),
    ]
}

pub fn demo_cases() -> Vec<ReferenceCase> {
    vec![
        ReferenceCase {
            id: "case-01".to_string(),
            title: "火锅门店客流下滑后的三个月恢复".to_string(),
            category: "火锅".to_string(),
            risk_codes: vec!["revenue_decline".to_string(), "weak_retention".to_string()],
            lesson: "工作日午市套餐加会员储值，三个月营业额恢复至下滑前水平".to_string(),
        },
        ReferenceCase {
            id: "case-02".to_string(),
            title: "投诉率过高的服务整改".to_string(),
            category: String::new(),
            risk_codes: vec!["complaints_high".to_string(), "low_rating".to_string()],
            lesson: "投诉日清加店长回访，两个月评分从 3.6 回升到 4.3".to_string(),
        },
        ReferenceCase {
            id: "case-03".to_string(),
            title: "食材成本失控的采购改革".to_string(),
            category: String::new(),
            risk_codes: vec!["cost_pressure".to_string()],
            lesson: "集中采购与损耗日报，成本占比下降 6 个百分点".to_string(),
        },
        ReferenceCase {
            id: "case-04".to_string(),
            title: "茶饮品牌的新品节奏".to_string(),
            category: "茶饮".to_string(),
            risk_codes: vec!["revenue_decline".to_string()],
            lesson: "每两周一款季节新品，稳定复购".to_string(),
        },
    ]
}
