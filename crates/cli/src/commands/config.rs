use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use routewise_core::config::AppConfig;
use serde::Serialize;
use toml::Value;

use crate::commands::{CommandResult, Session};

/// Config keys with the env vars that can override them, first match wins.
const TRACKED_FIELDS: &[(&str, &[&str])] = &[
    ("resolver.domain_suffixes", &["ROUTEWISE_RESOLVER_EXTRA_SUFFIXES"]),
    ("resolver.partial_threshold_short", &[]),
    ("resolver.partial_threshold_long", &[]),
    ("resolver.ambiguity_gap", &["ROUTEWISE_RESOLVER_AMBIGUITY_GAP"]),
    ("resolver.context_inherit_max_chars", &["ROUTEWISE_RESOLVER_CONTEXT_INHERIT_MAX_CHARS"]),
    ("resolver.stopwords", &[]),
    ("resolver.context_cues", &[]),
    ("classifier.score_floor", &["ROUTEWISE_CLASSIFIER_SCORE_FLOOR"]),
    ("classifier.history_window", &[]),
    ("classifier.multi_intent_threshold", &["ROUTEWISE_CLASSIFIER_MULTI_INTENT_THRESHOLD"]),
    ("query.llm_escalation_threshold", &["ROUTEWISE_QUERY_ESCALATION_THRESHOLD"]),
    ("query.comparison_policy", &["ROUTEWISE_QUERY_COMPARISON_POLICY"]),
    ("query.comparison_rule_confidence", &[]),
    ("router.cache_ttl_secs", &["ROUTEWISE_ROUTER_CACHE_TTL_SECS"]),
    ("router.hybrid_risk_factor_threshold", &["ROUTEWISE_ROUTER_HYBRID_RISK_THRESHOLD"]),
    ("router.reference_case_limit", &[]),
    ("router.suggestion_limit", &[]),
    ("context.max_recent_messages", &["ROUTEWISE_CONTEXT_MAX_MESSAGES"]),
    ("context.max_intent_history", &[]),
    ("logging.level", &["ROUTEWISE_LOGGING_LEVEL", "ROUTEWISE_LOG_LEVEL"]),
    ("logging.format", &["ROUTEWISE_LOGGING_FORMAT", "ROUTEWISE_LOG_FORMAT"]),
];

#[derive(Debug, Serialize)]
struct ConfigReport<'a> {
    precedence: &'static str,
    config_file: Option<String>,
    config: &'a AppConfig,
    sources: BTreeMap<&'static str, String>,
}

pub fn run(session: &Session) -> CommandResult {
    let config_file_path = session.config_path.clone().or_else(detect_config_path);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let sources = TRACKED_FIELDS
        .iter()
        .map(|(key_path, env_keys)| {
            let source = field_source(
                key_path,
                env_keys,
                config_file_doc.as_ref(),
                config_file_path.as_deref(),
            );
            (*key_path, source)
        })
        .collect();

    let report = ConfigReport {
        precedence: "env > file > default",
        config_file: config_file_path.map(|path| path.display().to_string()),
        config: &session.config,
        sources,
    };
    CommandResult::with_data("config", "effective config", &report)
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("routewise.toml"), PathBuf::from("config/routewise.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| is_set(key)) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) || extends_suffixes(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn is_set(key: &str) -> bool {
    env::var(key).map(|value| !value.trim().is_empty()).unwrap_or(false)
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

// `resolver.extra_suffixes` in a file appends to the suffix list.
fn extends_suffixes(root: &Value, key_path: &str) -> bool {
    key_path == "resolver.domain_suffixes" && contains_path(root, "resolver.extra_suffixes")
}

#[cfg(test)]
mod tests {
    use toml::Value;

    use super::{contains_path, field_source};

    #[test]
    fn file_keys_are_attributed_to_the_file() {
        let doc: Value = "[router]\ncache_ttl_secs = 30\n".parse().expect("toml");
        let source = field_source(
            "router.cache_ttl_secs",
            &[],
            Some(&doc),
            Some(std::path::Path::new("routewise.toml")),
        );
        assert_eq!(source, "file (routewise.toml)");
        assert_eq!(field_source("router.suggestion_limit", &[], Some(&doc), None), "default");
    }

    #[test]
    fn suffix_extension_counts_as_file_source() {
        let doc: Value = "[resolver]\nextra_suffixes = [\"食堂\"]\n".parse().expect("toml");
        assert!(!contains_path(&doc, "resolver.domain_suffixes"));
        assert_eq!(field_source("resolver.domain_suffixes", &[], Some(&doc), None), "file (config file)");
    }
}
