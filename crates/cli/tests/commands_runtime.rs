use std::env;
use std::fs;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use routewise_cli::commands::{
    chat, classify, config, load_session, resolve, structure, Session, SessionOptions,
};
use routewise_core::domain::execution::Strategy;
use serde_json::Value;

#[test]
fn resolve_finds_demo_merchant() {
    with_env(&[], || {
        let session = demo_session();
        let result = resolve::run(&session, "海底捞最近怎么样", None);
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "resolve");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["data"]["result"]["matched"], true);
        assert_eq!(payload["data"]["result"]["entity_id"], "m-001");
        assert!(payload["data"].get("suggestions").is_none());
    });
}

#[test]
fn resolve_ambiguous_name_returns_suggestions() {
    with_env(&[], || {
        let session = demo_session();
        let result = resolve::run(&session, "湘味小店的情况", None);
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["data"]["result"]["matched"], false);
        assert_eq!(payload["message"], "no entity resolved");
        let suggestions = payload["data"]["suggestions"].as_array().cloned().unwrap_or_default();
        assert_eq!(suggestions.len(), 2);
        assert_eq!(suggestions[0]["entity_name"], "湘味小厨");
    });
}

#[test]
fn resolve_inherits_context_entity_for_short_follow_up() {
    with_env(&[], || {
        let session = demo_session();
        let result = resolve::run(&session, "他呢", Some("m-002"));
        let payload = parse_payload(&result.output);
        assert_eq!(payload["data"]["result"]["entity_id"], "m-002");
        assert_eq!(payload["data"]["result"]["match_kind"], "context_inherited");
    });
}

#[test]
fn resolve_rejects_unknown_context_entity() {
    with_env(&[], || {
        let session = demo_session();
        let result = resolve::run(&session, "数据", Some("m-404"));
        assert_eq!(result.exit_code, 5);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "invalid_argument");
    });
}

#[test]
fn classify_reports_intent_and_trace() {
    with_env(&[], || {
        let session = demo_session();
        let result = classify::run(&session, "蜀大侠火锅有什么风险");
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["data"]["result"]["intent"], "diagnosis");
        let ranked = payload["data"]["ranked"].as_array().cloned().unwrap_or_default();
        assert!(!ranked.is_empty());
        assert_eq!(ranked[0]["intent"], "diagnosis");
        assert!(ranked.iter().all(|scored| scored["score"].as_f64().unwrap_or(0.0) > 0.0));
    });
}

#[test]
fn structure_trend_question_is_handled_by_rules() {
    with_env(&[], || {
        let session = demo_session();
        let result = structure::run(&session, "海底捞最近30天营业额走势");
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["data"]["query_type"], "trend_analysis");
        assert_eq!(payload["data"]["source"], "rules");
        assert_eq!(payload["data"]["entities"]["time_range"], "最近30天");
    });
}

#[test]
fn chat_keeps_one_conversation_across_lines() {
    with_env(&[], || {
        let session = demo_session();
        let input = Cursor::new("海底捞火锅最近怎么样\n\n他有什么风险\n");
        let mut output = Vec::new();
        let result =
            chat::run(&session, Some("cli-test".to_string()), None, input, &mut output);
        assert_eq!(result.exit_code, 0);

        let summary = parse_payload(&result.output);
        assert_eq!(summary["command"], "chat");
        assert_eq!(summary["data"]["conversation_id"], "cli-test");
        assert_eq!(summary["data"]["turns"], 2);
        assert_eq!(summary["data"]["failed_turns"], 0);

        let written = String::from_utf8(output).expect("utf8 output");
        let turns: Vec<Value> = written.lines().map(parse_payload).collect();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1]["success"], true);
        assert_eq!(turns[1]["metadata"]["entityName"], "海底捞火锅");
        assert_eq!(turns[1]["metadata"]["dataSource"], "skills");
    });
}

#[test]
fn chat_forced_llm_without_model_degrades() {
    with_env(&[], || {
        let session = demo_session();
        let input = Cursor::new("你好\n喜茶最近怎么样\n");
        let mut output = Vec::new();
        let result = chat::run(&session, None, Some(Strategy::Llm), input, &mut output);
        assert_eq!(result.exit_code, 0);

        let summary = parse_payload(&result.output);
        let conversation_id = summary["data"]["conversation_id"].as_str().unwrap_or_default();
        assert!(conversation_id.starts_with("cli-"));

        let written = String::from_utf8(output).expect("utf8 output");
        for turn in written.lines().map(parse_payload) {
            assert_eq!(turn["success"], true);
            assert_ne!(turn["metadata"]["dataSource"], "llm");
        }
    });
}

#[test]
fn config_reports_env_source() {
    with_env(&[("ROUTEWISE_ROUTER_CACHE_TTL_SECS", "120")], || {
        let session = demo_session();
        let result = config::run(&session);
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["data"]["config"]["router"]["cache_ttl_secs"], 120);
        assert_eq!(
            payload["data"]["sources"]["router.cache_ttl_secs"],
            "env (ROUTEWISE_ROUTER_CACHE_TTL_SECS)"
        );
        assert_eq!(payload["data"]["sources"]["logging.level"], "default");
    });
}

#[test]
fn config_file_values_are_attributed_to_the_file() {
    with_env(&[], || {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("routewise.toml");
        fs::write(&path, "[router]\nsuggestion_limit = 3\n").expect("write config");

        let session = load_session(
            "config",
            &SessionOptions { config_path: Some(path.clone()), registry_path: None },
        )
        .unwrap_or_else(|failure| panic!("session should load: {}", failure.output));
        assert_eq!(session.config.router.suggestion_limit, 3);

        let payload = parse_payload(&config::run(&session).output);
        let expected = format!("file ({})", path.display());
        assert_eq!(payload["data"]["sources"]["router.suggestion_limit"], expected.as_str());
    });
}

#[test]
fn invalid_env_override_fails_session_setup() {
    with_env(&[("ROUTEWISE_RESOLVER_AMBIGUITY_GAP", "0.9")], || {
        let Err(failure) = load_session("resolve", &SessionOptions::default()) else {
            panic!("out-of-range ambiguity gap should be rejected");
        };
        assert_eq!(failure.exit_code, 2);

        let payload = parse_payload(&failure.output);
        assert_eq!(payload["command"], "resolve");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn missing_registry_fixture_fails_session_setup() {
    with_env(&[], || {
        let options = SessionOptions {
            config_path: None,
            registry_path: Some(PathBuf::from("does-not-exist/merchants.json")),
        };
        let Err(failure) = load_session("chat", &options) else {
            panic!("missing fixture should be rejected");
        };
        assert_eq!(failure.exit_code, 3);
        assert_eq!(parse_payload(&failure.output)["error_class"], "registry_load");
    });
}

#[test]
fn registry_fixture_replaces_demo_entities() {
    with_env(&[], || {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("merchants.json");
        fs::write(
            &path,
            r#"[{"id": "s-1", "name": "老王面馆", "category": "面馆", "metrics": {"health_score": 71}}]"#,
        )
        .expect("write fixture");

        let session = load_session(
            "resolve",
            &SessionOptions { config_path: None, registry_path: Some(path) },
        )
        .unwrap_or_else(|failure| panic!("session should load: {}", failure.output));

        let payload = parse_payload(&resolve::run(&session, "老王面馆怎么样", None).output);
        assert_eq!(payload["data"]["result"]["entity_id"], "s-1");

        let payload = parse_payload(&resolve::run(&session, "海底捞火锅", None).output);
        assert_eq!(payload["data"]["result"]["matched"], false);
    });
}

fn demo_session() -> Session {
    load_session("test", &SessionOptions::default())
        .unwrap_or_else(|failure| panic!("demo session should load: {}", failure.output))
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "ROUTEWISE_RESOLVER_EXTRA_SUFFIXES",
        "ROUTEWISE_RESOLVER_AMBIGUITY_GAP",
        "ROUTEWISE_RESOLVER_CONTEXT_INHERIT_MAX_CHARS",
        "ROUTEWISE_CLASSIFIER_SCORE_FLOOR",
        "ROUTEWISE_CLASSIFIER_MULTI_INTENT_THRESHOLD",
        "ROUTEWISE_QUERY_ESCALATION_THRESHOLD",
        "ROUTEWISE_QUERY_COMPARISON_POLICY",
        "ROUTEWISE_ROUTER_CACHE_TTL_SECS",
        "ROUTEWISE_ROUTER_HYBRID_RISK_THRESHOLD",
        "ROUTEWISE_CONTEXT_MAX_MESSAGES",
        "ROUTEWISE_LOGGING_LEVEL",
        "ROUTEWISE_LOGGING_FORMAT",
        "ROUTEWISE_LOG_LEVEL",
        "ROUTEWISE_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        match value {
            Some(value) => env::set_var(key, value),
            None => env::remove_var(key),
        }
    }
}
