//! Tiered entity resolution.
//!
//! Tiers run in order and the first one that produces a single winner decides:
//! exact containment, suffix-stripped cores, keyword / n-gram reverse lookup,
//! partial LCS scoring with an ambiguity guard, and finally inheritance of the
//! conversation's active entity.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use routewise_core::config::ResolverConfig;
use routewise_core::domain::entity::{Entity, EntityId, EntityResult, MatchKind};
use routewise_core::registry::EntityRegistry;
use serde::Serialize;
use tracing::{debug, info};

use crate::normalize::{char_len, char_ngrams, lcs_len, normalize, script_runs, tokenize};

pub const EXACT_CONFIDENCE: f64 = 1.0;
pub const SUFFIX_CONFIDENCE: f64 = 0.85;
pub const KEYWORD_CONFIDENCE: f64 = 0.75;
pub const CONTEXT_CONFIDENCE: f64 = 0.7;

const MIN_CORE_CHARS: usize = 2;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EntitySuggestion {
    pub entity_id: EntityId,
    pub entity_name: String,
    pub score: f64,
}

#[derive(Clone, Debug)]
struct IndexedEntity {
    id: EntityId,
    names: Vec<String>,
    cores: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum PartialPick {
    Winner(usize, f64),
    Ambiguous { top: f64, runner_up: f64 },
    BelowThreshold,
}

pub struct EntityResolver {
    registry: Arc<dyn EntityRegistry>,
    config: ResolverConfig,
    suffixes: Vec<String>,
    index: Vec<IndexedEntity>,
}

impl EntityResolver {
    pub fn new(registry: Arc<dyn EntityRegistry>, config: ResolverConfig) -> Self {
        let mut suffixes = config
            .domain_suffixes
            .iter()
            .map(|suffix| normalize(suffix))
            .filter(|suffix| !suffix.is_empty())
            .collect::<Vec<_>>();
        suffixes.sort_by(|left, right| {
            char_len(right).cmp(&char_len(left)).then_with(|| left.cmp(right))
        });
        suffixes.dedup();

        let index = registry
            .all()
            .iter()
            .map(|entity| {
                let names = entity
                    .names()
                    .map(normalize)
                    .filter(|name| !name.is_empty())
                    .collect::<Vec<_>>();
                let cores = names
                    .iter()
                    .map(|name| strip_suffixes(name, &suffixes))
                    .filter(|core| char_len(core) >= MIN_CORE_CHARS)
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect();
                IndexedEntity { id: entity.id.clone(), names, cores }
            })
            .collect();

        Self { registry, config, suffixes, index }
    }

    pub fn registry(&self) -> &Arc<dyn EntityRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn resolve(&self, input: &str, context_entity_id: Option<&EntityId>) -> EntityResult {
        let normalized = normalize(input);
        if normalized.is_empty() {
            return EntityResult::unmatched();
        }

        let matched = self
            .match_exact(&normalized)
            .or_else(|| self.match_suffix_stripped(&normalized))
            .or_else(|| self.match_keywords(input))
            .or_else(|| self.match_partial(&normalized));
        if let Some(result) = matched {
            debug!(
                event_name = "agent.resolver.matched",
                match_kind = result.match_kind().map(|kind| kind.as_str()).unwrap_or("none"),
                entity_id = result.entity_id().map(EntityId::as_str).unwrap_or_default(),
                confidence = result.confidence(),
                "entity resolved"
            );
            return result;
        }

        if let Some(result) =
            context_entity_id.and_then(|id| self.inherit_context(input, &normalized, id))
        {
            debug!(
                event_name = "agent.resolver.context_inherited",
                entity_id = result.entity_id().map(EntityId::as_str).unwrap_or_default(),
                "entity inherited from conversation context"
            );
            return result;
        }

        EntityResult::unmatched()
    }

    /// Every entity whose name, alias or suffix-stripped core appears in the
    /// input, in registry order.
    pub fn extract_all(&self, input: &str) -> Vec<EntityResult> {
        let normalized = normalize(input);
        if normalized.is_empty() {
            return Vec::new();
        }

        self.index
            .iter()
            .filter_map(|indexed| {
                let entity = self.registry.get(&indexed.id)?;
                if indexed.names.iter().any(|name| normalized.contains(name.as_str())) {
                    Some(EntityResult::matched(entity, EXACT_CONFIDENCE, MatchKind::Exact))
                } else if indexed.cores.iter().any(|core| normalized.contains(core.as_str())) {
                    Some(EntityResult::matched(entity, SUFFIX_CONFIDENCE, MatchKind::SuffixStripped))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Autocomplete ranked by prefix, then substring, then LCS overlap. An empty
    /// partial returns the first `limit` registry entries.
    pub fn suggest(&self, partial: &str, limit: usize) -> Vec<EntitySuggestion> {
        let normalized = normalize(partial);
        let mut ranked = Vec::new();

        for (position, indexed) in self.index.iter().enumerate() {
            let best = indexed
                .names
                .iter()
                .map(|name| suggestion_rank(&normalized, name))
                .fold(None, |best: Option<(u8, f64)>, rank| match (best, rank) {
                    (Some(current), Some(candidate)) if candidate > current => Some(candidate),
                    (None, candidate) => candidate,
                    (current, _) => current,
                });
            if let Some((bucket, score)) = best {
                ranked.push((bucket, score, position));
            }
        }

        ranked.sort_by(|left, right| {
            right
                .0
                .cmp(&left.0)
                .then_with(|| right.1.total_cmp(&left.1))
                .then_with(|| left.2.cmp(&right.2))
        });

        ranked
            .into_iter()
            .filter_map(|(bucket, score, position)| {
                let indexed = self.index.get(position)?;
                let entity = self.registry.get(&indexed.id)?;
                Some(EntitySuggestion {
                    entity_id: entity.id.clone(),
                    entity_name: entity.name.clone(),
                    score: f64::from(bucket) + score,
                })
            })
            .take(limit)
            .collect()
    }

    pub fn validate(&self, id: &EntityId) -> bool {
        self.registry.contains(id)
    }

    fn matched(&self, position: usize, confidence: f64, kind: MatchKind) -> Option<EntityResult> {
        let indexed = self.index.get(position)?;
        let entity: &Entity = self.registry.get(&indexed.id)?;
        Some(EntityResult::matched(entity, confidence, kind))
    }

    fn match_exact(&self, normalized: &str) -> Option<EntityResult> {
        let mut best: Option<(usize, usize)> = None;
        for (position, indexed) in self.index.iter().enumerate() {
            for name in &indexed.names {
                let length = char_len(name);
                if normalized.contains(name.as_str())
                    && best.map_or(true, |(best_length, _)| length > best_length)
                {
                    best = Some((length, position));
                }
            }
        }
        best.and_then(|(_, position)| self.matched(position, EXACT_CONFIDENCE, MatchKind::Exact))
    }

    fn match_suffix_stripped(&self, normalized: &str) -> Option<EntityResult> {
        let input_core = strip_suffixes(normalized, &self.suffixes);
        let input_len = char_len(&input_core);
        if input_len < MIN_CORE_CHARS {
            return None;
        }

        let mut hits = BTreeMap::new();
        for (position, indexed) in self.index.iter().enumerate() {
            for core in &indexed.cores {
                let core_len = char_len(core) as i64;
                // Forward hits prefer longer cores, reverse hits prefer tighter ones.
                let key = if input_core.contains(core.as_str()) {
                    Some((2u8, core_len))
                } else if core.contains(input_core.as_str()) {
                    Some((1u8, -core_len))
                } else {
                    None
                };
                if let Some(key) = key {
                    keep_best(&mut hits, position, key);
                }
            }
        }

        unique_best(&hits)
            .and_then(|position| self.matched(position, SUFFIX_CONFIDENCE, MatchKind::SuffixStripped))
    }

    fn match_keywords(&self, input: &str) -> Option<EntityResult> {
        let candidates = keyword_candidates(input, &self.config.stopwords);
        if candidates.is_empty() {
            return None;
        }

        let mut hits = BTreeMap::new();
        for (position, indexed) in self.index.iter().enumerate() {
            let matched = candidates
                .iter()
                .filter(|candidate| indexed.cores.iter().any(|core| core.contains(candidate.as_str())))
                .collect::<Vec<_>>();
            if let Some(longest) = matched.iter().map(|candidate| char_len(candidate)).max() {
                keep_best(&mut hits, position, (longest, matched.len()));
            }
        }

        unique_best(&hits)
            .and_then(|position| self.matched(position, KEYWORD_CONFIDENCE, MatchKind::Keyword))
    }

    fn match_partial(&self, normalized: &str) -> Option<EntityResult> {
        let threshold = self.config.partial_threshold(char_len(normalized));
        let scores = self
            .index
            .iter()
            .enumerate()
            .map(|(position, indexed)| {
                let best = indexed
                    .names
                    .iter()
                    .chain(indexed.cores.iter())
                    .map(|candidate| partial_score(normalized, candidate))
                    .fold(0.0, f64::max);
                (position, best)
            })
            .collect::<Vec<_>>();

        match select_partial(&scores, threshold, self.config.ambiguity_gap) {
            PartialPick::Winner(position, score) => {
                self.matched(position, score, MatchKind::Partial)
            }
            PartialPick::Ambiguous { top, runner_up } => {
                info!(
                    event_name = "agent.resolver.ambiguous",
                    top_score = top,
                    runner_up_score = runner_up,
                    gap = self.config.ambiguity_gap,
                    "partial match is ambiguous, refusing to guess"
                );
                None
            }
            PartialPick::BelowThreshold => None,
        }
    }

    fn inherit_context(
        &self,
        input: &str,
        normalized: &str,
        context_entity_id: &EntityId,
    ) -> Option<EntityResult> {
        let entity = self.registry.get(context_entity_id)?;
        let lowered = input.to_lowercase();
        let short = char_len(normalized) < self.config.context_inherit_max_chars;
        let cued = self.config.context_cues.iter().any(|cue| lowered.contains(cue.as_str()));
        (short || cued)
            .then(|| EntityResult::matched(entity, CONTEXT_CONFIDENCE, MatchKind::ContextInherited))
    }
}

/// Repeatedly removes the longest matching suffix while the core keeps at
/// least two characters.
fn strip_suffixes(text: &str, suffixes: &[String]) -> String {
    let mut core = text.to_string();
    loop {
        let stripped = suffixes.iter().find_map(|suffix| {
            let remainder = core.strip_suffix(suffix.as_str())?;
            (char_len(remainder) >= MIN_CORE_CHARS).then(|| remainder.to_string())
        });
        match stripped {
            Some(next) => core = next,
            None => return core,
        }
    }
}

fn keyword_candidates(input: &str, stopwords: &[String]) -> BTreeSet<String> {
    let mut candidates = BTreeSet::new();
    candidates.extend(tokenize(input));
    for run in script_runs(input) {
        candidates.extend(char_ngrams(&run, 2));
        candidates.extend(char_ngrams(&run, 3));
        candidates.insert(run);
    }
    candidates.retain(|candidate| {
        char_len(candidate) >= MIN_CORE_CHARS && !stopwords.contains(candidate)
    });
    candidates
}

fn partial_score(input: &str, candidate: &str) -> f64 {
    let input_len = char_len(input);
    let candidate_len = char_len(candidate);
    if input_len == 0 || candidate_len == 0 {
        return 0.0;
    }

    let containment = if candidate.contains(input) {
        input_len as f64 / candidate_len as f64
    } else if input.contains(candidate) {
        candidate_len as f64 / input_len as f64
    } else {
        0.0
    };

    let common = lcs_len(input, candidate);
    let lcs_ratio = if common >= MIN_CORE_CHARS { common as f64 / candidate_len as f64 } else { 0.0 };

    containment.max(lcs_ratio).min(1.0)
}

fn select_partial(scores: &[(usize, f64)], threshold: f64, gap: f64) -> PartialPick {
    let mut ranked = scores.iter().copied().filter(|(_, score)| *score > 0.0).collect::<Vec<_>>();
    ranked.sort_by(|left, right| right.1.total_cmp(&left.1).then_with(|| left.0.cmp(&right.0)));

    let Some(&(position, top)) = ranked.first() else {
        return PartialPick::BelowThreshold;
    };
    if top < threshold {
        return PartialPick::BelowThreshold;
    }
    match ranked.get(1) {
        Some(&(_, runner_up)) if top - runner_up < gap => {
            PartialPick::Ambiguous { top, runner_up }
        }
        _ => PartialPick::Winner(position, top),
    }
}

fn suggestion_rank(partial: &str, name: &str) -> Option<(u8, f64)> {
    if partial.is_empty() {
        return Some((0, 0.0));
    }
    let name_len = char_len(name) as f64;
    if name.starts_with(partial) {
        return Some((3, char_len(partial) as f64 / name_len));
    }
    if name.contains(partial) {
        return Some((2, char_len(partial) as f64 / name_len));
    }
    let common = lcs_len(partial, name);
    (common > 0).then(|| (1, common as f64 / name_len))
}

fn keep_best<K: Ord + Copy>(hits: &mut BTreeMap<usize, K>, position: usize, key: K) {
    hits.entry(position).and_modify(|current| *current = (*current).max(key)).or_insert(key);
}

/// The single entity holding the strongest key, or `None` on a tie.
fn unique_best<K: Ord + Copy>(hits: &BTreeMap<usize, K>) -> Option<usize> {
    let best = hits.values().max()?;
    let mut leaders = hits.iter().filter(|(_, key)| *key == best).map(|(position, _)| *position);
    let leader = leaders.next()?;
    leaders.next().is_none().then_some(leader)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use routewise_core::config::ResolverConfig;
    use routewise_core::domain::entity::{Entity, EntityId, MatchKind};
    use routewise_core::registry::InMemoryRegistry;

    use super::{partial_score, select_partial, strip_suffixes, EntityResolver, PartialPick};

    fn resolver() -> EntityResolver {
        let registry = InMemoryRegistry::new(vec![
            Entity::new("m-001", "海底捞火锅", "餐饮"),
            Entity::new("m-002", "喜茶", "茶饮").with_alias("HeyTea"),
            Entity::new("m-003", "蜀大侠火锅", "餐饮"),
            Entity::new("m-004", "湘味小厨", "餐饮"),
            Entity::new("m-005", "湘味小馆", "餐饮"),
            Entity::new("m-006", "瑞幸咖啡", "咖啡"),
        ])
        .expect("unique ids");
        EntityResolver::new(Arc::new(registry), ResolverConfig::default())
    }

    fn suffixes() -> Vec<String> {
        ["火锅", "店", "咖啡"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn exact_containment_wins_with_full_confidence() {
        let result = resolver().resolve("海底捞火锅这周营业额多少", None);
        assert_eq!(result.match_kind(), Some(MatchKind::Exact));
        assert_eq!(result.entity_id().map(EntityId::as_str), Some("m-001"));
        assert_eq!(result.confidence(), 1.0);
    }

    #[test]
    fn aliases_match_case_insensitively() {
        let result = resolver().resolve("heytea 最近怎么样", None);
        assert_eq!(result.entity_id().map(EntityId::as_str), Some("m-002"));
        assert_eq!(result.match_kind(), Some(MatchKind::Exact));
    }

    #[test]
    fn suffix_stripped_core_matches_short_mention() {
        let result = resolver().resolve("海底捞最近怎么样", None);
        assert_eq!(result.entity_id().map(EntityId::as_str), Some("m-001"));
        assert_eq!(result.match_kind(), Some(MatchKind::SuffixStripped));
        assert_eq!(result.confidence(), 0.85);
    }

    #[test]
    fn keyword_ngrams_reach_inside_entity_cores() {
        let result = resolver().resolve("大侠家这个月生意", None);
        assert_eq!(result.entity_id().map(EntityId::as_str), Some("m-003"));
        assert_eq!(result.match_kind(), Some(MatchKind::Keyword));
        assert_eq!(result.confidence(), 0.75);
    }

    #[test]
    fn near_tie_between_partial_candidates_is_unmatched() {
        let result = resolver().resolve("湘味小店的情况", None);
        assert!(!result.is_matched());
        assert_eq!(result.confidence(), 0.0);
    }

    #[test]
    fn short_input_inherits_context_entity() {
        let context = EntityId::new("m-001");
        let result = resolver().resolve("风险呢", Some(&context));
        assert_eq!(result.match_kind(), Some(MatchKind::ContextInherited));
        assert_eq!(result.entity_id().map(EntityId::as_str), Some("m-001"));
        assert_eq!(result.confidence(), 0.7);
    }

    #[test]
    fn pronoun_inherits_context_entity_for_long_input() {
        let context = EntityId::new("m-001");
        let result = resolver().resolve("他这个季度有什么风险", Some(&context));
        assert_eq!(result.match_kind(), Some(MatchKind::ContextInherited));
    }

    #[test]
    fn explicit_mention_beats_context() {
        let context = EntityId::new("m-001");
        let result = resolver().resolve("那喜茶呢", Some(&context));
        assert_eq!(result.entity_id().map(EntityId::as_str), Some("m-002"));
    }

    #[test]
    fn unknown_context_entity_is_not_inherited() {
        let context = EntityId::new("m-404");
        let result = resolver().resolve("风险呢", Some(&context));
        assert!(!result.is_matched());
    }

    #[test]
    fn empty_input_is_unmatched_even_with_context() {
        let context = EntityId::new("m-001");
        let result = resolver().resolve("  ？", Some(&context));
        assert!(!result.is_matched());
        assert_eq!(result.confidence(), 0.0);
    }

    #[test]
    fn ambiguity_guard_rejects_close_scores() {
        let pick = select_partial(&[(0, 0.55), (1, 0.52)], 0.3, 0.1);
        assert!(matches!(pick, PartialPick::Ambiguous { .. }));

        let pick = select_partial(&[(0, 0.55), (1, 0.40)], 0.3, 0.1);
        assert_eq!(pick, PartialPick::Winner(0, 0.55));

        let pick = select_partial(&[(0, 0.25)], 0.3, 0.1);
        assert_eq!(pick, PartialPick::BelowThreshold);
    }

    #[test]
    fn partial_score_is_bounded() {
        assert_eq!(partial_score("海底", "海底捞"), 2.0 / 3.0);
        assert_eq!(partial_score("茶", "喜茶"), 0.5);
        assert_eq!(partial_score("完全无关", "喜茶"), 0.0);
        assert!(partial_score("喜茶喜茶喜茶", "喜茶") <= 1.0);
    }

    #[test]
    fn suffix_stripping_keeps_two_char_core() {
        assert_eq!(strip_suffixes("海底捞火锅", &suffixes()), "海底捞");
        assert_eq!(strip_suffixes("瑞幸咖啡店", &suffixes()), "瑞幸");
        assert_eq!(strip_suffixes("火锅", &suffixes()), "火锅");
    }

    #[test]
    fn extract_all_lists_every_exact_mention() {
        let results = resolver().extract_all("对比一下海底捞火锅和喜茶");
        let ids = results
            .iter()
            .filter_map(|result| result.entity_id().map(|id| id.as_str().to_string()))
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["m-001", "m-002"]);

        let kinds = resolver()
            .extract_all("喜茶和瑞幸哪个好")
            .iter()
            .filter_map(|result| result.match_kind())
            .collect::<Vec<_>>();
        assert_eq!(kinds, vec![MatchKind::Exact, MatchKind::SuffixStripped]);
    }

    #[test]
    fn suggest_ranks_prefix_before_substring() {
        let suggestions = resolver().suggest("湘味", 5);
        let names = suggestions.iter().map(|s| s.entity_name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["湘味小厨", "湘味小馆"]);

        let suggestions = resolver().suggest("火锅", 5);
        let names = suggestions.iter().map(|s| s.entity_name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["海底捞火锅", "蜀大侠火锅"]);
    }

    #[test]
    fn suggest_with_empty_partial_lists_registry_head() {
        let suggestions = resolver().suggest("", 2);
        assert_eq!(suggestions.len(), 2);
        assert_eq!(suggestions[0].entity_name, "海底捞火锅");
    }

    #[test]
    fn validate_checks_registry_membership() {
        let resolver = resolver();
        assert!(resolver.validate(&EntityId::new("m-006")));
        assert!(!resolver.validate(&EntityId::new("m-999")));
    }
}
