//! Intent classification.
//!
//! The rule path is synchronous and deterministic: keyword weights, a
//! per-intent priority multiplier, then context-aware adjustments driven by
//! the previous turns. The multi-intent path asks the model for a ranked list
//! and always falls back to the rule path.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use routewise_core::config::ClassifierConfig;
use routewise_core::domain::context::ConversationContext;
use routewise_core::domain::intent::{Intent, IntentResult, RankedIntent};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::context::summarize;
use crate::llm::{chat_if_available, extract_json_payload, ChatMessage, ChatOptions, LlmClient};
use crate::normalize::{char_len, normalize};
use crate::prompts;

pub const FALLBACK_CONFIDENCE: f64 = 0.3;
pub const RULE_FALLBACK_REASON: &str = "rule_fallback";

const STATUS_FOLLOW_UP_BOOST: f64 = 1.5;
const CHAINED_RECOMMENDATION_BOOST: f64 = 1.3;
const SHORT_FOLLOW_UP_BOOST: f64 = 1.4;
const REPEAT_PENALTY: f64 = 0.9;
const PROBLEM_AFTER_STATUS_BOOST: f64 = 1.8;

const PROBLEM_VOCABULARY: &[&str] = &["问题", "毛病", "不对劲", "出事", "异常", "不正常", "麻烦"];

pub struct IntentPattern {
    pub intent: Intent,
    pub keywords: &'static [(&'static str, f64)],
    pub priority: f64,
}

pub const PATTERNS: &[IntentPattern] = &[
    IntentPattern {
        intent: Intent::StatusQuery,
        keywords: &[
            ("怎么样", 10.0),
            ("咋样", 10.0),
            ("状态", 10.0),
            ("健康度", 12.0),
            ("健康", 8.0),
            ("情况", 8.0),
            ("表现", 8.0),
            ("经营", 6.0),
            ("最近", 6.0),
            ("如何", 6.0),
            ("status", 10.0),
        ],
        priority: 1.0,
    },
    IntentPattern {
        intent: Intent::DataQuery,
        keywords: &[
            ("营业额", 12.0),
            ("销售额", 12.0),
            ("流水", 12.0),
            ("客单价", 12.0),
            ("gmv", 12.0),
            ("数据", 10.0),
            ("订单", 10.0),
            ("指标", 10.0),
            ("多少", 8.0),
            ("几家", 8.0),
            ("统计", 8.0),
            ("查一下", 4.0),
        ],
        priority: 1.0,
    },
    IntentPattern {
        intent: Intent::Diagnosis,
        keywords: &[
            ("诊断", 14.0),
            ("风险", 12.0),
            ("原因", 12.0),
            ("异常", 12.0),
            ("为什么", 10.0),
            ("问题", 10.0),
            ("下降", 10.0),
            ("下滑", 10.0),
            ("亏损", 10.0),
            ("不好", 8.0),
            ("risk", 12.0),
        ],
        priority: 1.2,
    },
    IntentPattern {
        intent: Intent::Recommendation,
        keywords: &[
            ("建议", 14.0),
            ("如何提升", 14.0),
            ("怎么办", 12.0),
            ("该怎么", 10.0),
            ("改善", 10.0),
            ("优化", 10.0),
            ("方案", 10.0),
            ("措施", 10.0),
            ("推荐", 10.0),
            ("提升", 8.0),
        ],
        priority: 1.1,
    },
    IntentPattern {
        intent: Intent::TrendAnalysis,
        keywords: &[
            ("趋势", 14.0),
            ("走势", 14.0),
            ("环比", 12.0),
            ("同比", 12.0),
            ("trend", 12.0),
            ("变化", 10.0),
            ("历史", 8.0),
            ("增长", 8.0),
        ],
        priority: 1.0,
    },
    IntentPattern {
        intent: Intent::Comparison,
        keywords: &[
            ("对比", 14.0),
            ("比较", 14.0),
            ("相比", 12.0),
            ("vs", 12.0),
            ("哪个好", 10.0),
            ("差距", 10.0),
            ("排名", 8.0),
        ],
        priority: 1.1,
    },
    IntentPattern {
        intent: Intent::GeneralChat,
        keywords: &[
            ("你是谁", 14.0),
            ("你好", 14.0),
            ("谢谢", 12.0),
            ("hello", 12.0),
            ("怎么用", 10.0),
            ("帮助", 8.0),
        ],
        priority: 0.8,
    },
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Adjustment {
    StatusFollowUp,
    ChainedRecommendation,
    ShortFollowUp,
    RepeatPenalty,
    ProblemAfterStatus,
}

impl Adjustment {
    fn factor(self) -> f64 {
        match self {
            Self::StatusFollowUp => STATUS_FOLLOW_UP_BOOST,
            Self::ChainedRecommendation => CHAINED_RECOMMENDATION_BOOST,
            Self::ShortFollowUp => SHORT_FOLLOW_UP_BOOST,
            Self::RepeatPenalty => REPEAT_PENALTY,
            Self::ProblemAfterStatus => PROBLEM_AFTER_STATUS_BOOST,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScoredIntent {
    pub intent: Intent,
    pub base_score: f64,
    pub score: f64,
    pub matched_keywords: BTreeSet<String>,
    pub adjustments: Vec<Adjustment>,
}

/// Full trace of one rule-based classification.
#[derive(Clone, Debug, PartialEq)]
pub struct Classification {
    pub result: IntentResult,
    pub ranked: Vec<ScoredIntent>,
}

#[derive(Clone, Debug)]
pub struct IntentClassifier {
    config: ClassifierConfig,
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}

impl IntentClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn classify(&self, input: &str, context: Option<&ConversationContext>) -> IntentResult {
        self.classify_detailed(input, context).result
    }

    pub fn classify_detailed(
        &self,
        input: &str,
        context: Option<&ConversationContext>,
    ) -> Classification {
        let normalized = normalize(input);
        let mut ranked = PATTERNS
            .iter()
            .filter_map(|pattern| score_pattern(pattern, &normalized))
            .map(|mut scored| {
                if let Some(context) = context {
                    self.adjust(&mut scored, &normalized, context);
                }
                scored
            })
            .filter(|scored| scored.score > 0.0)
            .collect::<Vec<_>>();
        ranked.sort_by(|left, right| {
            right
                .score
                .partial_cmp(&left.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| left.intent.cmp(&right.intent))
        });

        let result = match ranked.first() {
            Some(top) if top.score >= self.config.score_floor => {
                let confidence = band_confidence(top.score, ranked.get(1).map(|second| second.score));
                IntentResult::new(top.intent, confidence, top.matched_keywords.clone())
            }
            _ => IntentResult::fallback(FALLBACK_CONFIDENCE),
        };

        debug!(
            event_name = "agent.classifier.classified",
            intent = result.intent.as_str(),
            confidence = result.confidence,
            candidates = ranked.len(),
            "classified input"
        );
        Classification { result, ranked }
    }

    /// Whether a rule result is weak enough to hand to the multi-intent path.
    pub fn wants_model(&self, result: &IntentResult) -> bool {
        result.confidence <= self.config.multi_intent_threshold
    }

    /// Ranked intents from the model, or the rule result as a single element
    /// when the model is absent, fails, or replies with nothing usable.
    pub async fn classify_multi(
        &self,
        input: &str,
        entities: &[String],
        context: Option<&ConversationContext>,
        llm: Option<&dyn LlmClient>,
    ) -> Vec<RankedIntent> {
        let summary = context.map(summarize).unwrap_or_default();
        let messages = [
            ChatMessage::system(prompts::MULTI_INTENT_SYSTEM),
            ChatMessage::user(prompts::multi_intent_prompt(&normalize(input), entities, &summary)),
        ];

        let ranked = match chat_if_available(llm, &messages, &ChatOptions::cached()).await {
            Ok(content) => parse_ranked_intents(&content),
            Err(error) => {
                debug!(
                    event_name = "agent.classifier.llm_skipped",
                    error = %error,
                    "multi-intent classification using rules"
                );
                Vec::new()
            }
        };

        if ranked.is_empty() {
            let rules = self.classify(input, context);
            return vec![RankedIntent::new(rules.intent, rules.confidence, RULE_FALLBACK_REASON)];
        }
        ranked
    }

    fn adjust(&self, scored: &mut ScoredIntent, normalized: &str, context: &ConversationContext) {
        let previous = context.last_intent;
        let intent = scored.intent;

        if previous == Some(Intent::StatusQuery)
            && matches!(intent, Intent::Diagnosis | Intent::Recommendation)
        {
            scored.apply(Adjustment::StatusFollowUp);
        }
        if previous == Some(Intent::Diagnosis) && intent == Intent::Recommendation {
            scored.apply(Adjustment::ChainedRecommendation);
        }
        if char_len(normalized) < self.config.short_input_chars
            && context.has_active_entity()
            && intent.is_follow_up()
        {
            scored.apply(Adjustment::ShortFollowUp);
        }
        if context.recent_intents(self.config.history_window).any(|recent| recent == intent) {
            scored.apply(Adjustment::RepeatPenalty);
        }
        if previous == Some(Intent::StatusQuery)
            && intent == Intent::Diagnosis
            && PROBLEM_VOCABULARY.iter().any(|word| normalized.contains(word))
        {
            scored.apply(Adjustment::ProblemAfterStatus);
        }
    }
}

impl ScoredIntent {
    fn apply(&mut self, adjustment: Adjustment) {
        self.score *= adjustment.factor();
        self.adjustments.push(adjustment);
    }
}

fn score_pattern(pattern: &IntentPattern, normalized: &str) -> Option<ScoredIntent> {
    let mut matched_keywords = BTreeSet::new();
    let mut base = 0.0;
    for (keyword, weight) in pattern.keywords {
        if normalized.contains(keyword) {
            base += weight;
            matched_keywords.insert((*keyword).to_string());
        }
    }
    if matched_keywords.is_empty() {
        return None;
    }
    let base_score = base * pattern.priority;
    Some(ScoredIntent {
        intent: pattern.intent,
        base_score,
        score: base_score,
        matched_keywords,
        adjustments: Vec::new(),
    })
}

fn band_confidence(top: f64, second: Option<f64>) -> f64 {
    match second {
        Some(second) if second > 0.0 => {
            let gap = top - second;
            let ratio = top / second;
            if gap >= 10.0 && ratio >= 2.0 {
                0.95
            } else if gap >= 5.0 && ratio >= 1.5 {
                0.85
            } else if gap >= 2.0 {
                0.7
            } else {
                0.5
            }
        }
        _ if top >= 30.0 => 0.95,
        _ if top >= 20.0 => 0.85,
        _ if top >= 10.0 => 0.7,
        _ => 0.5,
    }
}

#[derive(Debug, Deserialize)]
struct RankedIntentPayload {
    intent: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    reason: String,
}

fn parse_ranked_intents(content: &str) -> Vec<RankedIntent> {
    let Some(payload) = extract_json_payload(content, '[', ']') else {
        warn!(event_name = "agent.classifier.llm_unparseable", "model reply had no JSON array");
        return Vec::new();
    };
    let entries = match serde_json::from_str::<Vec<RankedIntentPayload>>(payload) {
        Ok(entries) => entries,
        Err(error) => {
            warn!(
                event_name = "agent.classifier.llm_unparseable",
                error = %error,
                "could not parse ranked intents"
            );
            return Vec::new();
        }
    };

    let mut ranked = entries
        .into_iter()
        .filter_map(|entry| {
            Intent::parse(&entry.intent)
                .map(|intent| RankedIntent::new(intent, entry.confidence, entry.reason))
        })
        .collect::<Vec<_>>();
    ranked.sort_by(|left, right| {
        right.confidence.partial_cmp(&left.confidence).unwrap_or(Ordering::Equal)
    });
    ranked
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use routewise_core::domain::context::ConversationContext;
    use routewise_core::domain::entity::EntityId;
    use routewise_core::domain::intent::Intent;

    use super::{band_confidence, Adjustment, IntentClassifier, FALLBACK_CONFIDENCE, RULE_FALLBACK_REASON};
    use crate::test_support::ScriptedLlm;

    fn context_after(intents: &[Intent]) -> ConversationContext {
        let mut context = ConversationContext::new("c-test");
        context.set_active_entity(EntityId::new("m-001"), "海底捞火锅");
        for intent in intents {
            context.record_intent(*intent, Utc::now());
        }
        context
    }

    #[test]
    fn status_question_without_context() {
        let result = IntentClassifier::default().classify("海底捞最近怎么样", None);
        assert_eq!(result.intent, Intent::StatusQuery);
        assert!(result.confidence >= 0.7);
        assert!(result.matched_keywords.contains("怎么样"));
    }

    #[test]
    fn risk_follow_up_after_status_is_diagnosis() {
        let classifier = IntentClassifier::default();
        let context = context_after(&[Intent::StatusQuery]);

        let classification = classifier.classify_detailed("他有什么风险", Some(&context));
        assert_eq!(classification.result.intent, Intent::Diagnosis);

        let top = &classification.ranked[0];
        assert!(top.adjustments.contains(&Adjustment::StatusFollowUp));
        assert!(top.score > top.base_score);
    }

    #[test]
    fn problem_vocabulary_after_status_boosts_diagnosis() {
        let classifier = IntentClassifier::default();
        let context = context_after(&[Intent::StatusQuery]);

        let classification = classifier.classify_detailed("是不是出了问题，状态不对劲", Some(&context));
        let diagnosis = classification
            .ranked
            .iter()
            .find(|scored| scored.intent == Intent::Diagnosis)
            .expect("diagnosis candidate");
        assert!(diagnosis.adjustments.contains(&Adjustment::ProblemAfterStatus));
        assert_eq!(classification.result.intent, Intent::Diagnosis);
    }

    #[test]
    fn recommendation_is_chained_after_diagnosis() {
        let classifier = IntentClassifier::default();
        let context = context_after(&[Intent::StatusQuery, Intent::Diagnosis]);

        let classification = classifier.classify_detailed("怎么办", Some(&context));
        let top = &classification.ranked[0];
        assert_eq!(top.intent, Intent::Recommendation);
        assert!(top.adjustments.contains(&Adjustment::ChainedRecommendation));
        assert!(top.adjustments.contains(&Adjustment::ShortFollowUp));
    }

    #[test]
    fn repeated_intent_is_penalized() {
        let classifier = IntentClassifier::default();
        let context = context_after(&[Intent::TrendAnalysis]);

        let classification = classifier.classify_detailed("看看营业额趋势", Some(&context));
        let trend = classification
            .ranked
            .iter()
            .find(|scored| scored.intent == Intent::TrendAnalysis)
            .expect("trend candidate");
        assert_eq!(trend.adjustments, vec![Adjustment::RepeatPenalty]);
        assert!((trend.score - trend.base_score * 0.9).abs() < 1e-9);
    }

    #[test]
    fn unmatched_input_falls_back_to_general_chat() {
        let result = IntentClassifier::default().classify("嗯嗯", None);
        assert_eq!(result.intent, Intent::GeneralChat);
        assert_eq!(result.confidence, FALLBACK_CONFIDENCE);
        assert!(result.matched_keywords.is_empty());
    }

    #[test]
    fn classification_is_idempotent() {
        let classifier = IntentClassifier::default();
        let context = context_after(&[Intent::StatusQuery]);
        let first = classifier.classify("最近的数据和趋势", Some(&context));
        let second = classifier.classify("最近的数据和趋势", Some(&context));
        assert_eq!(first, second);
    }

    #[test]
    fn ties_break_by_declaration_order() {
        // 数据 (data_query, 10) ties 变化 (trend_analysis, 10).
        let classification = IntentClassifier::default().classify_detailed("数据变化", None);
        assert_eq!(classification.ranked[0].intent, Intent::DataQuery);
        assert_eq!(classification.result.confidence, 0.5);
    }

    #[test]
    fn only_weak_rule_results_want_the_model() {
        let classifier = IntentClassifier::default();
        assert!(classifier.wants_model(&classifier.classify("海底捞的经营", None)));
        assert!(classifier.wants_model(&classifier.classify("嗯嗯", None)));
        assert!(!classifier.wants_model(&classifier.classify("海底捞最近怎么样", None)));
    }

    #[test]
    fn confidence_bands() {
        assert_eq!(band_confidence(30.0, Some(10.0)), 0.95);
        assert_eq!(band_confidence(18.0, Some(12.0)), 0.85);
        assert_eq!(band_confidence(14.0, Some(12.0)), 0.7);
        assert_eq!(band_confidence(13.0, Some(12.0)), 0.5);
        assert_eq!(band_confidence(31.0, None), 0.95);
        assert_eq!(band_confidence(21.0, None), 0.85);
        assert_eq!(band_confidence(10.0, None), 0.7);
        assert_eq!(band_confidence(6.0, None), 0.5);
    }

    #[tokio::test]
    async fn multi_intent_parses_fenced_reply() {
        let llm = ScriptedLlm::replying([
            "```json\n[{\"intent\": \"recommendation\", \"confidence\": 0.6, \"reason\": \"asks what to do\"},\n {\"intent\": \"diagnosis\", \"confidence\": 1.4, \"reason\": \"risk\"},\n {\"intent\": \"forecast\", \"confidence\": 0.9, \"reason\": \"unknown\"}]\n```",
        ]);

        let ranked = IntentClassifier::default()
            .classify_multi("海底捞有什么风险，该怎么办", &["海底捞火锅".to_string()], None, Some(&llm))
            .await;

        let intents = ranked.iter().map(|entry| entry.intent).collect::<Vec<_>>();
        assert_eq!(intents, vec![Intent::Diagnosis, Intent::Recommendation]);
        assert_eq!(ranked[0].confidence, 1.0);
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn multi_intent_falls_back_to_rules() {
        let classifier = IntentClassifier::default();

        let unavailable = classifier
            .classify_multi("海底捞最近怎么样", &[], None, Some(&ScriptedLlm::unavailable()))
            .await;
        assert_eq!(unavailable.len(), 1);
        assert_eq!(unavailable[0].intent, Intent::StatusQuery);
        assert_eq!(unavailable[0].reason, RULE_FALLBACK_REASON);

        let garbage = classifier
            .classify_multi("海底捞最近怎么样", &[], None, Some(&ScriptedLlm::replying(["我不确定"])))
            .await;
        assert_eq!(garbage[0].reason, RULE_FALLBACK_REASON);

        let failing = classifier
            .classify_multi("海底捞最近怎么样", &[], None, Some(&ScriptedLlm::failing("timeout")))
            .await;
        assert_eq!(failing[0].intent, Intent::StatusQuery);
    }
}
