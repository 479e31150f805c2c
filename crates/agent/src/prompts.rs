//! Prompt text for every model call. Replies are parsed by the callers, so
//! each prompt spells out the exact JSON shape it expects.

use routewise_core::domain::intent::Intent;
use routewise_core::domain::query::StructuredQuery;

use crate::skills::{ReferenceCase, SkillOutput};

pub const MULTI_INTENT_SYSTEM: &str =
    "你是商户经营助手的意图识别模块。只输出 JSON 数组，不要输出解释。";

pub const STRUCTURE_SYSTEM: &str =
    "你是商户经营助手的查询解析模块。把用户问题解析为一个 JSON 对象，只输出 JSON。";

pub const CHAT_SYSTEM: &str =
    "你是商户经营助手，帮助运营人员了解门店经营状况。回答简洁，使用中文，不编造数据。";

pub const HYBRID_SYSTEM: &str =
    "你是资深餐饮经营顾问。基于给定的诊断数据和参考案例给出具体可执行的建议，不编造数据。";

fn intent_list() -> String {
    Intent::ALL.iter().map(Intent::as_str).collect::<Vec<_>>().join(", ")
}

pub fn multi_intent_prompt(normalized_input: &str, entities: &[String], context_summary: &str) -> String {
    let entities = if entities.is_empty() { "无".to_string() } else { entities.join("、") };
    let context = if context_summary.is_empty() { "无" } else { context_summary };
    format!(
        "用户问题: {normalized_input}\n\
         识别到的实体: {entities}\n\
         对话上下文:\n{context}\n\n\
         可选意图: {intents}\n\
         按可能性从高到低列出问题包含的意图，格式:\n\
         [{{\"intent\": \"<意图>\", \"confidence\": <0到1>, \"reason\": \"<简短理由>\"}}]",
        intents = intent_list()
    )
}

const STRUCTURE_EXAMPLES: &str = r#"示例:
问题: 海底捞最近怎么样
{"query_type": "single_entity", "entities": ["海底捞"], "intents": ["status_query"]}
问题: 高风险的火锅店有几家
{"query_type": "aggregation", "entities": [], "intents": ["data_query"], "operation": "count", "group_by": "category", "filters": {"risk_level": "high"}}
问题: 喜茶和瑞幸本月对比
{"query_type": "comparison", "entities": ["喜茶", "瑞幸"], "intents": ["comparison"], "comparison_target": "peer_entities", "time_range": "本月"}
问题: 蜀大侠最近30天营业额趋势
{"query_type": "trend_analysis", "entities": ["蜀大侠"], "intents": ["trend_analysis"], "time_range": "最近30天"}"#;

pub fn structure_prompt(input: &str, context_summary: &str) -> String {
    let context = if context_summary.is_empty() { "无" } else { context_summary };
    format!(
        "{STRUCTURE_EXAMPLES}\n\n\
         规则:\n\
         - query_type 取值: single_entity, aggregation, comparison, trend_analysis\n\
         - entities 只填实体名本身，不带\"的\"、问句或时间词\n\
         - comparison_target 取值: previous_period, category_average, peer_entities\n\
         - operation 取值: count, sum, average, max, min\n\
         - intents 取值: {intents}\n\n\
         对话上下文:\n{context}\n\n\
         问题: {input}",
        intents = intent_list()
    )
}

pub fn chat_user_prompt(
    input: &str,
    entity_name: Option<&str>,
    context_summary: &str,
    query: Option<&StructuredQuery>,
    local_figures: Option<&SkillOutput>,
) -> String {
    let mut prompt = String::new();
    if !context_summary.is_empty() {
        prompt.push_str(&format!("对话上下文:\n{context_summary}\n\n"));
    }
    if let Some(name) = entity_name {
        prompt.push_str(&format!("当前讨论的商户: {name}\n"));
    }
    if let Some(query) = query {
        prompt.push_str(&format!("结构化查询:\n{}\n", query_brief(query)));
    }
    if let Some(figures) = local_figures {
        prompt.push_str(&format!("本地统计结果:\n{}\n", figures.render()));
    }
    prompt.push_str(&format!("用户: {input}"));
    prompt
}

/// One `- key: value` line per field the query actually carries.
fn query_brief(query: &StructuredQuery) -> String {
    let mut lines = vec![format!("- 类型: {}", query.query_type.as_str())];
    if !query.entities.names.is_empty() {
        lines.push(format!("- 实体: {}", query.entities.names.join("、")));
    }
    if !query.intents.is_empty() {
        let intents = query.intents.iter().map(Intent::as_str).collect::<Vec<_>>();
        lines.push(format!("- 意图: {}", intents.join(", ")));
    }
    if let Some(range) = &query.entities.time_range {
        lines.push(format!("- 时间范围: {range}"));
    }
    if let Some(target) = query.entities.comparison_target {
        lines.push(format!("- 对比对象: {}", target.as_str()));
    }
    if let Some(spec) = &query.aggregations {
        let operation = spec.operation.map(|operation| operation.as_str()).unwrap_or("count");
        match &spec.group_by {
            Some(field) => lines.push(format!("- 聚合: {operation}，按 {field} 分组")),
            None => lines.push(format!("- 聚合: {operation}")),
        }
    }
    if !query.filters.is_empty() {
        let filters =
            query.filters.iter().map(|(key, value)| format!("{key}={value}")).collect::<Vec<_>>();
        lines.push(format!("- 过滤: {}", filters.join(", ")));
    }
    lines.join("\n")
}

pub fn hybrid_prompt(
    entity_name: &str,
    input: &str,
    diagnosis: &SkillOutput,
    cases: &[ReferenceCase],
) -> String {
    let cases = if cases.is_empty() {
        "无".to_string()
    } else {
        cases
            .iter()
            .map(|case| format!("- {}: {}", case.title, case.lesson))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "商户: {entity_name}\n\
         用户问题: {input}\n\n\
         诊断数据:\n{diagnosis}\n\n\
         参考案例:\n{cases}\n\n\
         请给出 3 条以内、按优先级排序的改进建议。",
        diagnosis = diagnosis.render()
    )
}
