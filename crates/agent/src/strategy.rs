use std::sync::Arc;

use routewise_core::domain::entity::Entity;
use routewise_core::domain::execution::Strategy;
use routewise_core::domain::intent::Intent;

use crate::skills::RiskScanner;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StrategyDecision {
    pub strategy: Strategy,
    pub reason_code: &'static str,
}

impl StrategyDecision {
    fn new(strategy: Strategy, reason_code: &'static str) -> Self {
        Self { strategy, reason_code }
    }
}

pub struct StrategySelector {
    hybrid_risk_factor_threshold: usize,
    scanner: Arc<dyn RiskScanner>,
}

impl StrategySelector {
    pub fn new(hybrid_risk_factor_threshold: usize, scanner: Arc<dyn RiskScanner>) -> Self {
        Self { hybrid_risk_factor_threshold, scanner }
    }

    pub fn select(
        &self,
        intent: Intent,
        entity: Option<&Entity>,
        force: Option<Strategy>,
    ) -> StrategyDecision {
        if let Some(strategy) = force {
            return StrategyDecision::new(strategy, "forced");
        }
        let Some(entity) = entity else {
            return StrategyDecision::new(Strategy::Llm, "no_entity");
        };

        match intent {
            Intent::StatusQuery | Intent::DataQuery => {
                StrategyDecision::new(Strategy::Skills, "metrics_lookup")
            }
            Intent::Diagnosis => {
                let factors = self.scanner.scan(entity).len();
                if factors > self.hybrid_risk_factor_threshold {
                    StrategyDecision::new(Strategy::Hybrid, "risk_escalation")
                } else {
                    StrategyDecision::new(Strategy::Skills, "risk_scan")
                }
            }
            Intent::Recommendation => StrategyDecision::new(Strategy::Hybrid, "advice_narrative"),
            Intent::TrendAnalysis | Intent::Comparison => {
                StrategyDecision::new(Strategy::Skills, "analytic_skill")
            }
            Intent::GeneralChat => StrategyDecision::new(Strategy::Llm, "open_conversation"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use routewise_core::domain::entity::Entity;
    use routewise_core::domain::execution::Strategy;
    use routewise_core::domain::intent::Intent;

    use super::StrategySelector;
    use crate::skills::builtin::{demo_entities, MetricRiskScanner};

    fn selector() -> StrategySelector {
        StrategySelector::new(3, Arc::new(MetricRiskScanner))
    }

    fn demo(id: &str) -> Entity {
        demo_entities().into_iter().find(|entity| entity.id.as_str() == id).expect("demo entity")
    }

    #[test]
    fn override_wins_over_everything() {
        let decision = selector().select(Intent::GeneralChat, None, Some(Strategy::Skills));
        assert_eq!(decision.strategy, Strategy::Skills);
        assert_eq!(decision.reason_code, "forced");
    }

    #[test]
    fn missing_entity_routes_to_llm() {
        let decision = selector().select(Intent::StatusQuery, None, None);
        assert_eq!(decision.strategy, Strategy::Llm);
        assert_eq!(decision.reason_code, "no_entity");
    }

    #[test]
    fn intents_map_to_default_strategies() {
        let healthy = demo("m-001");
        let expectations = [
            (Intent::StatusQuery, Strategy::Skills),
            (Intent::DataQuery, Strategy::Skills),
            (Intent::Diagnosis, Strategy::Skills),
            (Intent::Recommendation, Strategy::Hybrid),
            (Intent::TrendAnalysis, Strategy::Skills),
            (Intent::Comparison, Strategy::Skills),
            (Intent::GeneralChat, Strategy::Llm),
        ];
        for (intent, expected) in expectations {
            assert_eq!(selector().select(intent, Some(&healthy), None).strategy, expected, "{intent}");
        }
    }

    #[test]
    fn many_risk_factors_escalate_diagnosis_to_hybrid() {
        let struggling = demo("m-003");
        let decision = selector().select(Intent::Diagnosis, Some(&struggling), None);
        assert_eq!(decision.strategy, Strategy::Hybrid);
        assert_eq!(decision.reason_code, "risk_escalation");

        // m-004 has two factors, under the threshold.
        let decision = selector().select(Intent::Diagnosis, Some(&demo("m-004")), None);
        assert_eq!(decision.strategy, Strategy::Skills);
    }
}
