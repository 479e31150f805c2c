use std::sync::Arc;
use std::time::Instant;

use routewise_core::config::{AppConfig, RouterConfig};
use routewise_core::domain::context::ConversationContext;
use routewise_core::domain::entity::{Entity, EntityId, EntityResult, MatchKind};
use routewise_core::domain::execution::{AgentExecutionResult, Strategy};
use routewise_core::domain::intent::{Intent, IntentResult};
use routewise_core::domain::query::{QuerySource, QueryType, StructuredQuery};
use routewise_core::errors::RoutingError;
use routewise_core::registry::EntityRegistry;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheKey, ResponseCache};
use crate::classifier::{IntentClassifier, RULE_FALLBACK_REASON};
use crate::context::{summarize, ContextManager, TurnRecord};
use crate::llm::{chat_if_available, ChatMessage, ChatOptions, LlmClient, TokenCallback};
use crate::normalize::normalize;
use crate::prompts;
use crate::resolver::EntityResolver;
use crate::skills::aggregate::{compare_named, RegistryAggregator};
use crate::skills::builtin::{default_skills, MetricRiskScanner, StaticCaseLibrary};
use crate::skills::{CaseLibrary, RiskScanner, SkillOutput, SkillRegistry};
use crate::strategy::{StrategyDecision, StrategySelector};
use crate::structurer::QueryStructurer;

pub const GENERAL_CHAT_REPLY: &str =
    "你好，我是经营助手，可以帮你查看商户的经营状况、风险诊断和改进建议。请告诉我想了解哪家商户。";

#[derive(Clone)]
pub struct AgentRequest {
    pub conversation_id: String,
    pub input: String,
    pub force_strategy: Option<Strategy>,
    pub on_token: Option<TokenCallback>,
}

impl AgentRequest {
    pub fn new(conversation_id: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            input: input.into(),
            force_strategy: None,
            on_token: None,
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.force_strategy = Some(strategy);
        self
    }

    pub fn with_token_callback(mut self, on_token: TokenCallback) -> Self {
        self.on_token = Some(on_token);
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
struct Execution {
    content: String,
    data_source: Strategy,
    suggested_actions: Vec<String>,
}

impl Execution {
    fn new(content: impl Into<String>, data_source: Strategy) -> Self {
        Self { content: content.into(), data_source, suggested_actions: Vec::new() }
    }

    fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            content: entry.content.clone(),
            data_source: Strategy::Skills,
            suggested_actions: entry.suggested_actions.clone(),
        }
    }

    fn from_output(output: SkillOutput, data_source: Strategy) -> Self {
        Self { content: output.render(), data_source, suggested_actions: output.suggested_actions }
    }
}

/// Everything routing settled on before a strategy runs.
struct Turn<'a> {
    request: &'a AgentRequest,
    input: &'a str,
    intent: Intent,
    entity: Option<&'a Entity>,
    peers: &'a [Entity],
    query: Option<&'a StructuredQuery>,
    context: &'a ConversationContext,
}

impl<'a> Turn<'a> {
    /// The query when it asks about the population rather than one entity.
    fn aggregation(&self) -> Option<&'a StructuredQuery> {
        self.query
            .filter(|query| query.query_type == QueryType::Aggregation && self.entity.is_none())
    }
}

pub struct AgentRuntimeBuilder {
    config: AppConfig,
    registry: Arc<dyn EntityRegistry>,
    skills: Option<SkillRegistry>,
    scanner: Option<Arc<dyn RiskScanner>>,
    cases: Option<Arc<dyn CaseLibrary>>,
    cache: Option<Arc<ResponseCache>>,
    contexts: Option<Arc<ContextManager>>,
    llm: Option<Arc<dyn LlmClient>>,
}

impl AgentRuntimeBuilder {
    pub fn skills(mut self, skills: SkillRegistry) -> Self {
        self.skills = Some(skills);
        self
    }

    pub fn risk_scanner(mut self, scanner: Arc<dyn RiskScanner>) -> Self {
        self.scanner = Some(scanner);
        self
    }

    pub fn cases(mut self, cases: Arc<dyn CaseLibrary>) -> Self {
        self.cases = Some(cases);
        self
    }

    pub fn cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn contexts(mut self, contexts: Arc<ContextManager>) -> Self {
        self.contexts = Some(contexts);
        self
    }

    pub fn llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn build(self) -> AgentRuntime {
        let AppConfig { resolver, classifier, query, router, context, .. } = self.config;
        let scanner = self.scanner.unwrap_or_else(|| Arc::new(MetricRiskScanner));
        let skills = self
            .skills
            .unwrap_or_else(|| default_skills(Arc::clone(&self.registry), Arc::clone(&scanner)));
        let cases = self
            .cases
            .unwrap_or_else(|| Arc::new(StaticCaseLibrary::new(Vec::new(), Arc::clone(&scanner))));
        let cache =
            self.cache.unwrap_or_else(|| Arc::new(ResponseCache::from_secs(router.cache_ttl_secs)));
        let contexts = self.contexts.unwrap_or_else(|| Arc::new(ContextManager::new(context)));

        let aggregator = RegistryAggregator::new(Arc::clone(&self.registry), Arc::clone(&scanner));
        let resolver = Arc::new(EntityResolver::new(self.registry, resolver));
        let classifier = IntentClassifier::new(classifier);
        let structurer = QueryStructurer::new(query, Arc::clone(&resolver), classifier.clone());
        let selector = StrategySelector::new(router.hybrid_risk_factor_threshold, scanner);

        AgentRuntime {
            config: router,
            resolver,
            classifier,
            structurer,
            selector,
            skills,
            aggregator,
            cases,
            cache,
            contexts,
            llm: self.llm,
        }
    }
}

/// Routes one conversational turn end to end: resolve, classify, structure,
/// select a strategy, execute it with fallbacks, then record the turn.
pub struct AgentRuntime {
    config: RouterConfig,
    resolver: Arc<EntityResolver>,
    classifier: IntentClassifier,
    structurer: QueryStructurer,
    selector: StrategySelector,
    skills: SkillRegistry,
    aggregator: RegistryAggregator,
    cases: Arc<dyn CaseLibrary>,
    cache: Arc<ResponseCache>,
    contexts: Arc<ContextManager>,
    llm: Option<Arc<dyn LlmClient>>,
}

impl AgentRuntime {
    pub fn builder(registry: Arc<dyn EntityRegistry>, config: AppConfig) -> AgentRuntimeBuilder {
        AgentRuntimeBuilder {
            config,
            registry,
            skills: None,
            scanner: None,
            cases: None,
            cache: None,
            contexts: None,
            llm: None,
        }
    }

    pub fn resolver(&self) -> &EntityResolver {
        &self.resolver
    }

    pub fn classifier(&self) -> &IntentClassifier {
        &self.classifier
    }

    pub fn structurer(&self) -> &QueryStructurer {
        &self.structurer
    }

    pub fn contexts(&self) -> &ContextManager {
        &self.contexts
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn llm(&self) -> Option<&dyn LlmClient> {
        self.llm.as_deref()
    }

    pub async fn handle(&self, request: AgentRequest) -> AgentExecutionResult {
        let started = Instant::now();
        let mut result = self.route(&request).await;
        result.metadata.execution_time =
            u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        info!(
            event_name = "agent.router.completed",
            conversation_id = %request.conversation_id,
            success = result.success,
            data_source = result.data_source().as_str(),
            execution_time_ms = result.metadata.execution_time,
            "turn completed"
        );
        result
    }

    async fn route(&self, request: &AgentRequest) -> AgentExecutionResult {
        let conversation_id = request.conversation_id.as_str();
        let input = request.input.trim();
        if normalize(input).is_empty() {
            warn!(event_name = "agent.router.empty_input", conversation_id, "rejecting empty input");
            return failure_result(self.entity_not_resolved(input));
        }

        let context = self.contexts.get_or_create(conversation_id).await;
        let resolved = self.resolver.resolve(input, context.active_entity_id.as_ref());
        let rules = self.classifier.classify(input, Some(&context));
        let (mut intent, confidence) = self.refine_intent(request, &resolved, &rules, &context).await;

        let mut entity = resolved.entity_id().and_then(|id| self.lookup(id));
        let mut peers = Vec::new();
        let query = if intent.is_analytic() || self.structurer.is_analytic_phrasing(input) {
            Some(self.structurer.structure(input, Some(&context), self.llm()).await)
        } else {
            None
        };
        if let Some(query) = &query {
            debug!(
                event_name = "agent.router.query_structured",
                conversation_id,
                query_type = query.query_type.as_str(),
                source = query.source.as_str(),
                confidence = query.confidence,
                "structured analytic query"
            );
            if let Some(primary) = primary_intent(query) {
                intent = primary;
            }
            let named = self.named_entities(query);
            // Population questions only anchor on entities the user named.
            if query.query_type == QueryType::Aggregation
                && named.is_empty()
                && resolved.match_kind() == Some(MatchKind::ContextInherited)
            {
                entity = None;
            }
            if entity.is_none() {
                entity = named.first().cloned();
            }
            if query.query_type == QueryType::Comparison {
                peers = named;
            }
        }

        let decision = self.selector.select(intent, entity.as_ref(), request.force_strategy);
        log_decision(conversation_id, intent, confidence, entity.as_ref(), decision);

        let turn = Turn {
            request,
            input,
            intent,
            entity: entity.as_ref(),
            peers: &peers,
            query: query.as_ref(),
            context: &context,
        };
        let outcome = match self.execute(decision.strategy, &turn).await {
            Ok(execution) => {
                let mut result = AgentExecutionResult::success(execution.content, execution.data_source)
                    .with_suggested_actions(execution.suggested_actions);
                result.suggested_action = result.metadata.suggested_actions.first().cloned();
                result
            }
            Err(error) => {
                warn!(
                    event_name = "agent.router.failed",
                    conversation_id,
                    error_kind = error.kind().as_str(),
                    error = %error,
                    "turn failed"
                );
                failure_result(error)
            }
        };
        let result = match &entity {
            Some(entity) => outcome.with_entity(Some(entity.id.clone()), Some(entity.name.clone())),
            None => outcome,
        };

        let mut record = TurnRecord::new(input, intent).with_reply(result.content.clone());
        if let Some(entity) = &entity {
            record = record.with_entity(entity.id.clone(), entity.name.clone());
        }
        self.contexts.record_turn(conversation_id, record).await;
        result
    }

    /// Weak rule results are re-ranked by a live model; its top intent wins.
    async fn refine_intent(
        &self,
        request: &AgentRequest,
        resolved: &EntityResult,
        rules: &IntentResult,
        context: &ConversationContext,
    ) -> (Intent, f64) {
        let llm = self.llm().filter(|llm| llm.is_available());
        if llm.is_none() || !self.classifier.wants_model(rules) {
            return (rules.intent, rules.confidence);
        }

        let entities = resolved.entity_name().map(str::to_string).into_iter().collect::<Vec<_>>();
        let ranked = self.classifier.classify_multi(&request.input, &entities, Some(context), llm).await;
        match ranked.first() {
            Some(top) if top.reason != RULE_FALLBACK_REASON => {
                debug!(
                    event_name = "agent.router.intent_refined",
                    conversation_id = %request.conversation_id,
                    rule_intent = rules.intent.as_str(),
                    rule_confidence = rules.confidence,
                    intent = top.intent.as_str(),
                    confidence = top.confidence,
                    "model re-ranked a weak rule result"
                );
                (top.intent, top.confidence)
            }
            _ => (rules.intent, rules.confidence),
        }
    }

    /// Registry entities for the names the query extracted itself.
    fn named_entities(&self, query: &StructuredQuery) -> Vec<Entity> {
        if query.entities.inherited {
            return Vec::new();
        }
        let mut entities = Vec::<Entity>::new();
        for name in &query.entities.names {
            let found = self.resolver.resolve(name, None).entity_id().and_then(|id| self.lookup(id));
            if let Some(entity) = found.filter(|found| entities.iter().all(|seen| seen.id != found.id)) {
                entities.push(entity);
            }
        }
        entities
    }

    async fn execute(&self, strategy: Strategy, turn: &Turn<'_>) -> Result<Execution, RoutingError> {
        match (strategy, turn.entity) {
            (Strategy::Llm, _) => self.run_llm(turn).await,
            (Strategy::Skills, Some(entity)) => self.run_local(turn, entity).await,
            (Strategy::Hybrid, Some(entity)) => self.run_hybrid(turn, entity).await,
            (Strategy::Skills | Strategy::Hybrid, None) => self.without_entity(turn),
        }
    }

    /// Named peers get a side-by-side comparison; everything else goes to
    /// the intent's skill.
    async fn run_local(&self, turn: &Turn<'_>, entity: &Entity) -> Result<Execution, RoutingError> {
        if turn.intent == Intent::Comparison && turn.peers.len() >= 2 {
            match compare_named(turn.peers) {
                Ok(output) => return Ok(Execution::from_output(output, Strategy::Skills)),
                Err(error) => debug!(
                    event_name = "agent.router.peer_comparison_skipped",
                    error = %error,
                    "falling back to the comparison skill"
                ),
            }
        }
        self.run_skills(turn.intent, entity).await
    }

    async fn run_skills(&self, intent: Intent, entity: &Entity) -> Result<Execution, RoutingError> {
        let key = CacheKey::new(intent, entity.id.clone());
        if let Some(entry) = self.cache.get(&key).await {
            return Ok(Execution::from_entry(&entry));
        }

        let skill = self.skills.resolve(intent)?;
        let output = skill.execute(entity).await?;
        debug!(
            event_name = "agent.router.skill_executed",
            skill = skill.name(),
            intent = intent.as_str(),
            entity_id = entity.id.as_str(),
            "skill executed"
        );
        let entry = self
            .cache
            .insert(key, CacheEntry::new(output.render(), output.suggested_actions))
            .await;
        Ok(Execution::from_entry(&entry))
    }

    async fn run_llm(&self, turn: &Turn<'_>) -> Result<Execution, RoutingError> {
        let figures = turn.aggregation().map(|query| self.aggregator.aggregate(query));
        let summary = summarize(turn.context);
        let messages = [
            ChatMessage::system(prompts::CHAT_SYSTEM),
            ChatMessage::user(prompts::chat_user_prompt(
                turn.input,
                turn.entity.map(|entity| entity.name.as_str()),
                &summary,
                turn.query,
                figures.as_ref(),
            )),
        ];
        let options = ChatOptions { use_cache: false, on_token: turn.request.on_token.clone() };

        match chat_if_available(self.llm(), &messages, &options).await {
            Ok(content) => Ok(Execution::new(content, Strategy::Llm)),
            Err(error) => {
                let error = RoutingError::from(error);
                warn!(
                    event_name = "agent.router.llm_degraded",
                    conversation_id = %turn.request.conversation_id,
                    error_kind = error.kind().as_str(),
                    error = %error,
                    "llm path degraded"
                );
                match (turn.entity, figures) {
                    (Some(entity), _) if turn.intent != Intent::GeneralChat => {
                        self.run_local(turn, entity).await
                    }
                    (_, Some(figures)) => Ok(Execution::from_output(figures, Strategy::Skills)),
                    _ => self.without_entity(turn),
                }
            }
        }
    }

    /// Skills first. Recommendations with a live model also get a narrative
    /// built from the diagnosis and reference cases, prepended to the skill
    /// output; any failure there keeps the skill result.
    async fn run_hybrid(&self, turn: &Turn<'_>, entity: &Entity) -> Result<Execution, RoutingError> {
        let conversation_id = turn.request.conversation_id.as_str();
        let baseline = match self.run_local(turn, entity).await {
            Ok(baseline) => baseline,
            Err(error) => {
                warn!(
                    event_name = "agent.router.hybrid_skill_failed",
                    conversation_id,
                    intent = turn.intent.as_str(),
                    error_kind = error.kind().as_str(),
                    error = %error,
                    "hybrid baseline failed, degrading"
                );
                return Ok(self.degraded_baseline(turn.intent, entity).await);
            }
        };
        if turn.intent != Intent::Recommendation {
            return Ok(baseline);
        }
        let Some(llm) = self.llm().filter(|llm| llm.is_available()) else {
            debug!(
                event_name = "agent.router.hybrid_skills_only",
                conversation_id,
                "llm unavailable, hybrid returns skills output"
            );
            return Ok(baseline);
        };

        let diagnosis = match self.skills.resolve(Intent::Diagnosis) {
            Ok(skill) => skill.execute(entity).await,
            Err(error) => Err(error),
        };
        let diagnosis = match diagnosis {
            Ok(diagnosis) => diagnosis,
            Err(error) => {
                warn!(
                    event_name = "agent.router.hybrid_diagnosis_failed",
                    error = %error,
                    "diagnosis unavailable for hybrid narrative"
                );
                return Ok(baseline);
            }
        };
        let cases = self.cases.best_matches(entity, self.config.reference_case_limit);
        let messages = [
            ChatMessage::system(prompts::HYBRID_SYSTEM),
            ChatMessage::user(prompts::hybrid_prompt(&entity.name, turn.input, &diagnosis, &cases)),
        ];
        let options = ChatOptions { use_cache: false, on_token: turn.request.on_token.clone() };

        match chat_if_available(Some(llm), &messages, &options).await {
            Ok(narrative) => Ok(Execution {
                content: format!("{narrative}\n\n{}", baseline.content),
                data_source: Strategy::Hybrid,
                suggested_actions: baseline.suggested_actions,
            }),
            Err(error) => {
                warn!(
                    event_name = "agent.router.llm_degraded",
                    conversation_id,
                    error = %error,
                    "hybrid narrative failed, returning skills output"
                );
                Ok(baseline)
            }
        }
    }

    /// Status overview in place of a failed skill, or a fixed notice when
    /// that fails too.
    async fn degraded_baseline(&self, intent: Intent, entity: &Entity) -> Execution {
        if intent != Intent::StatusQuery {
            if let Ok(status) = self.run_skills(Intent::StatusQuery, entity).await {
                return status;
            }
        }
        Execution::new(format!("暂时无法完成对{}的分析，请稍后再试。", entity.name), Strategy::Skills)
    }

    fn without_entity(&self, turn: &Turn<'_>) -> Result<Execution, RoutingError> {
        if let Some(query) = turn.aggregation() {
            let output = self.aggregator.aggregate(query);
            debug!(
                event_name = "agent.router.aggregated",
                conversation_id = %turn.request.conversation_id,
                matched = self.aggregator.matching(query).len(),
                "answered from the registry"
            );
            return Ok(Execution::from_output(output, Strategy::Skills));
        }
        if turn.intent.requires_entity() {
            Err(self.entity_not_resolved(turn.input))
        } else {
            Ok(Execution::new(GENERAL_CHAT_REPLY, Strategy::Skills))
        }
    }

    fn entity_not_resolved(&self, input: &str) -> RoutingError {
        let limit = self.config.suggestion_limit;
        let mut suggestions = self.resolver.suggest(input, limit);
        if suggestions.is_empty() {
            suggestions = self.resolver.suggest("", limit);
        }
        RoutingError::EntityNotResolved {
            input: input.to_string(),
            suggestions: suggestions.into_iter().map(|suggestion| suggestion.entity_name).collect(),
        }
    }

    fn lookup(&self, id: &EntityId) -> Option<Entity> {
        self.resolver.registry().get(id).cloned()
    }
}

/// Intent a rule or model structuring pass read off an analytic query.
fn primary_intent(query: &StructuredQuery) -> Option<Intent> {
    if query.query_type == QueryType::SingleEntity || query.source == QuerySource::Fallback {
        return None;
    }
    query.intents.first().copied()
}

fn failure_result(error: RoutingError) -> AgentExecutionResult {
    let suggestions = match &error {
        RoutingError::EntityNotResolved { suggestions, .. } => suggestions.clone(),
        _ => Vec::new(),
    };
    let mut result =
        AgentExecutionResult::failure(error.user_message(), Strategy::Skills, error.kind(), error.to_string());
    result.suggested_action = suggestions.first().map(|name| format!("试试问“{name}最近怎么样”"));
    result.with_suggested_actions(suggestions)
}

fn log_decision(
    conversation_id: &str,
    intent: Intent,
    confidence: f64,
    entity: Option<&Entity>,
    decision: StrategyDecision,
) {
    info!(
        event_name = "agent.router.strategy_selected",
        conversation_id,
        intent = intent.as_str(),
        intent_confidence = confidence,
        entity_id = entity.map(|entity| entity.id.as_str()),
        strategy = decision.strategy.as_str(),
        reason_code = decision.reason_code,
        "strategy selected"
    );
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use routewise_core::config::AppConfig;
    use routewise_core::domain::entity::Entity;
    use routewise_core::domain::execution::Strategy;
    use routewise_core::domain::intent::Intent;
    use routewise_core::errors::{RoutingErrorKind, SkillError};
    use routewise_core::registry::InMemoryRegistry;

    use super::{AgentRequest, AgentRuntime, GENERAL_CHAT_REPLY};
    use crate::skills::builtin::{
        default_skills, demo_cases, demo_entities, MetricRiskScanner, StaticCaseLibrary,
    };
    use crate::skills::{Skill, SkillOutput};
    use crate::test_support::ScriptedLlm;

    struct BrokenPlan;

    #[async_trait]
    impl Skill for BrokenPlan {
        fn name(&self) -> &'static str {
            "broken_plan"
        }

        fn intent(&self) -> Intent {
            Intent::Recommendation
        }

        async fn execute(&self, _entity: &Entity) -> Result<SkillOutput, SkillError> {
            Err(SkillError::Failed { skill: self.name().to_string(), message: "planner offline".to_string() })
        }
    }

    fn runtime(llm: Option<ScriptedLlm>) -> (AgentRuntime, Option<Arc<ScriptedLlm>>) {
        let registry = Arc::new(InMemoryRegistry::new(demo_entities()).expect("registry"));
        let cases = Arc::new(StaticCaseLibrary::new(demo_cases(), Arc::new(MetricRiskScanner)));
        let mut builder = AgentRuntime::builder(registry, AppConfig::default()).cases(cases);
        let shared = llm.map(Arc::new);
        if let Some(llm) = &shared {
            builder = builder.llm(llm.clone());
        }
        (builder.build(), shared)
    }

    #[tokio::test]
    async fn status_turn_runs_skills_and_records_context() {
        let (runtime, _) = runtime(None);
        let result = runtime.handle(AgentRequest::new("c-1", "海底捞最近怎么样")).await;

        assert!(result.success);
        assert_eq!(result.data_source(), Strategy::Skills);
        assert_eq!(result.metadata.entity_name.as_deref(), Some("海底捞火锅"));
        assert!(result.content.contains("健康度 82"));

        let context = runtime.contexts().snapshot("c-1").await.expect("context recorded");
        assert_eq!(context.active_entity_name.as_deref(), Some("海底捞火锅"));
        assert_eq!(context.recent_messages.len(), 2);
    }

    #[tokio::test]
    async fn general_chat_without_model_gets_canned_reply() {
        let (runtime, llm) = runtime(Some(ScriptedLlm::unavailable()));
        let result = runtime.handle(AgentRequest::new("c-2", "你好")).await;

        assert!(result.success);
        assert_eq!(result.content, GENERAL_CHAT_REPLY);
        assert_eq!(result.data_source(), Strategy::Skills);
        assert_eq!(llm.map(|llm| llm.calls()), Some(0));
    }

    #[tokio::test]
    async fn general_chat_with_model_uses_llm() {
        let (runtime, _) = runtime(Some(ScriptedLlm::replying(["你好！有什么可以帮你？"])));
        let result = runtime.handle(AgentRequest::new("c-3", "你好")).await;
        assert_eq!(result.data_source(), Strategy::Llm);
        assert_eq!(result.content, "你好！有什么可以帮你？");
    }

    #[tokio::test]
    async fn unknown_entity_returns_suggestions() {
        let (runtime, _) = runtime(None);
        let result = runtime.handle(AgentRequest::new("c-4", "星巴克的营业额多少")).await;

        assert!(!result.success);
        assert_eq!(result.error.as_ref().map(|error| error.kind), Some(RoutingErrorKind::EntityNotResolved));
        assert!(!result.metadata.suggested_actions.is_empty());
        assert!(result.suggested_action.is_some());
    }

    #[tokio::test]
    async fn recommendation_with_model_prepends_narrative() {
        let (runtime, llm) = runtime(Some(ScriptedLlm::replying(["先稳住客流，再做会员复购。"])));
        let result = runtime.handle(AgentRequest::new("c-5", "蜀大侠火锅该怎么改善")).await;

        assert_eq!(result.data_source(), Strategy::Hybrid);
        assert!(result.content.starts_with("先稳住客流"));
        assert!(result.content.contains("针对蜀大侠火锅的改进建议"));
        let prompt = llm.as_ref().and_then(|llm| llm.last_prompt()).unwrap_or_default();
        assert!(prompt.contains("火锅门店客流下滑后的三个月恢复"));
    }

    #[tokio::test]
    async fn forced_llm_degrades_to_skills_on_failure() {
        let (runtime, _) = runtime(Some(ScriptedLlm::failing("boom")));
        let request = AgentRequest::new("c-6", "喜茶最近怎么样").with_strategy(Strategy::Llm);
        let result = runtime.handle(request).await;

        assert!(result.success);
        assert_eq!(result.data_source(), Strategy::Skills);
        assert!(result.content.starts_with("喜茶整体经营健康"));
    }

    #[tokio::test]
    async fn hybrid_narrative_failure_keeps_skill_output() {
        let (runtime, llm) = runtime(Some(ScriptedLlm::failing("boom")));
        let result = runtime.handle(AgentRequest::new("c-7", "蜀大侠火锅该怎么改善")).await;

        assert!(result.success);
        assert_eq!(result.data_source(), Strategy::Skills);
        assert!(result.content.starts_with("针对蜀大侠火锅的改进建议"));
        assert!(!result.metadata.suggested_actions.is_empty());
        assert_eq!(llm.map(|llm| llm.calls()), Some(1));
    }

    #[tokio::test]
    async fn hybrid_skill_failure_degrades_to_status_overview() {
        let registry = Arc::new(InMemoryRegistry::new(demo_entities()).expect("registry"));
        let mut skills = default_skills(registry.clone(), Arc::new(MetricRiskScanner));
        skills.register(BrokenPlan);
        let runtime = AgentRuntime::builder(registry, AppConfig::default()).skills(skills).build();

        let result = runtime.handle(AgentRequest::new("c-8", "蜀大侠火锅该怎么改善")).await;
        assert!(result.success);
        assert_eq!(result.data_source(), Strategy::Skills);
        assert!(result.content.starts_with("蜀大侠火锅整体经营预警，健康度 52"));
    }

    #[tokio::test]
    async fn population_question_is_answered_from_registry() {
        let (runtime, _) = runtime(None);
        let result = runtime.handle(AgentRequest::new("c-9", "处于风险状态的商户有多少家")).await;

        assert!(result.success);
        assert_eq!(result.data_source(), Strategy::Skills);
        assert_eq!(result.content, "高风险商户共 1 家\n- 蜀大侠火锅");
        assert!(result.metadata.entity_name.is_none());

        let context = runtime.contexts().snapshot("c-9").await.expect("context recorded");
        assert_eq!(context.last_intent, Some(Intent::DataQuery));
    }

    #[tokio::test]
    async fn aggregation_prompt_carries_structured_query() {
        let (runtime, llm) = runtime(Some(ScriptedLlm::replying(["共 6 家，火锅和湘菜各 2 家。"])));
        let result = runtime.handle(AgentRequest::new("c-10", "按品类统计商户有几家")).await;

        assert_eq!(result.data_source(), Strategy::Llm);
        assert_eq!(result.content, "共 6 家，火锅和湘菜各 2 家。");
        let llm = llm.expect("scripted model");
        assert_eq!(llm.calls(), 1);
        let prompt = llm.last_prompt().unwrap_or_default();
        assert!(prompt.contains("- 类型: aggregation"));
        assert!(prompt.contains("- 聚合: count，按 category 分组"));
        assert!(prompt.contains("- 火锅: 2 家（海底捞火锅、蜀大侠火锅）"));
    }

    #[tokio::test]
    async fn weak_rule_result_is_reranked_by_model() {
        let (runtime, llm) = runtime(Some(ScriptedLlm::replying([
            r#"[{"intent": "diagnosis", "confidence": 0.9, "reason": "询问经营问题"}]"#,
        ])));
        let result = runtime.handle(AgentRequest::new("c-11", "海底捞的经营")).await;

        assert_eq!(llm.map(|llm| llm.calls()), Some(1));
        assert_eq!(result.data_source(), Strategy::Skills);
        assert_eq!(result.content, "海底捞火锅暂未发现明显风险");
        let context = runtime.contexts().snapshot("c-11").await.expect("context recorded");
        assert_eq!(context.last_intent, Some(Intent::Diagnosis));
    }

    #[tokio::test]
    async fn confident_rule_result_skips_the_model() {
        let (runtime, llm) = runtime(Some(ScriptedLlm::replying(["[]"])));
        let result = runtime.handle(AgentRequest::new("c-12", "海底捞最近怎么样")).await;

        assert_eq!(result.data_source(), Strategy::Skills);
        assert_eq!(llm.map(|llm| llm.calls()), Some(0));
    }

    #[tokio::test]
    async fn population_question_ignores_the_active_entity() {
        let (runtime, _) = runtime(None);
        runtime.handle(AgentRequest::new("c-13", "海底捞火锅最近怎么样")).await;

        let grouped = runtime.handle(AgentRequest::new("c-13", "按品类统计商户有几家")).await;
        assert!(grouped.success);
        assert!(grouped.metadata.entity_name.is_none());
        assert!(grouped.content.starts_with("商户共 6 家，按品类分布"));

        let risky = runtime.handle(AgentRequest::new("c-13", "处于风险状态的商户有多少家")).await;
        assert!(risky.metadata.entity_name.is_none());
        assert_eq!(risky.content, "高风险商户共 1 家\n- 蜀大侠火锅");
    }

    #[tokio::test]
    async fn named_peers_are_compared_side_by_side() {
        let (runtime, _) = runtime(None);
        let result = runtime.handle(AgentRequest::new("c-14", "喜茶和瑞幸咖啡比较一下")).await;

        assert!(result.success);
        assert_eq!(result.data_source(), Strategy::Skills);
        assert!(result.content.starts_with("喜茶健康度 88，在 2 家中最高"));
        assert!(result.content.contains("瑞幸咖啡: 健康度 79"));
    }
}
