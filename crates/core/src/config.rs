use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, Default, Serialize)]
pub struct AppConfig {
    pub resolver: ResolverConfig,
    pub classifier: ClassifierConfig,
    pub query: QueryConfig,
    pub router: RouterConfig,
    pub context: ContextConfig,
    pub logging: LoggingConfig,
}

/// Knobs for the tiered entity matcher. The partial-match threshold falls
/// linearly from `partial_threshold_short` at `short_input_chars` to
/// `partial_threshold_long` at `long_input_chars`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResolverConfig {
    pub domain_suffixes: Vec<String>,
    pub partial_threshold_short: f64,
    pub partial_threshold_long: f64,
    pub short_input_chars: usize,
    pub long_input_chars: usize,
    pub ambiguity_gap: f64,
    pub context_inherit_max_chars: usize,
    /// Words too generic to identify an entity on their own.
    pub stopwords: Vec<String>,
    /// Cues that the turn refers back to the entity already under discussion.
    pub context_cues: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClassifierConfig {
    pub score_floor: f64,
    pub history_window: usize,
    pub short_input_chars: usize,
    /// Rule confidence at or below which a live model re-ranks the intents.
    pub multi_intent_threshold: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QueryConfig {
    pub llm_escalation_threshold: f64,
    pub comparison_policy: ComparisonPolicy,
    pub comparison_rule_confidence: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RouterConfig {
    pub cache_ttl_secs: u64,
    pub hybrid_risk_factor_threshold: usize,
    pub reference_case_limit: usize,
    pub suggestion_limit: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ContextConfig {
    pub max_recent_messages: usize,
    pub max_intent_history: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// How rule-detected comparison phrasing is treated by the query structurer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonPolicy {
    /// Pin rule confidence below the escalation threshold so the LLM tier runs.
    EscalateToLlm,
    /// Accept the rule result like any other query type.
    TrustRules,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub cache_ttl_secs: Option<u64>,
    pub ambiguity_gap: Option<f64>,
    pub comparison_policy: Option<ComparisonPolicy>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

pub const DEFAULT_DOMAIN_SUFFIXES: &[&str] = &[
    "旗舰店", "专卖店", "体验店", "火锅店", "连锁店", "火锅", "餐厅", "饭店", "酒家", "奶茶", "茶饮", "咖啡",
    "烘焙", "面馆", "小吃", "超市", "便利店", "门店", "分店", "总店", "连锁", "店",
];

pub const DEFAULT_STOPWORDS: &[&str] = &[
    "最近", "怎么", "怎么样", "什么", "情况", "一下", "看看", "看下", "帮我", "查询", "查下", "分析", "风险",
    "问题", "数据", "经营", "这个", "那个", "现在", "今天", "昨天", "我们", "你们", "如何", "多少", "哪些",
    "为什么", "建议", "状态", "健康", "对比", "比较", "趋势", "商户", "门店", "有没有", "是不是", "可以",
];

pub const DEFAULT_CONTEXT_CUES: &[&str] = &[
    "他", "她", "它", "这家", "那家", "这个", "那个", "该店", "这店", "其", "...", "…", "呢", "吗", "怎么样",
    "咋样", "如何", "为什么", "什么", "多少", "哪些", "还有",
];

fn owned(words: &[&str]) -> Vec<String> {
    words.iter().map(|word| word.to_string()).collect()
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            domain_suffixes: owned(DEFAULT_DOMAIN_SUFFIXES),
            partial_threshold_short: 0.6,
            partial_threshold_long: 0.3,
            short_input_chars: 3,
            long_input_chars: 6,
            ambiguity_gap: 0.1,
            context_inherit_max_chars: 5,
            stopwords: owned(DEFAULT_STOPWORDS),
            context_cues: owned(DEFAULT_CONTEXT_CUES),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self { score_floor: 5.0, history_window: 3, short_input_chars: 5, multi_intent_threshold: 0.5 }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            llm_escalation_threshold: 0.9,
            comparison_policy: ComparisonPolicy::EscalateToLlm,
            comparison_rule_confidence: 0.5,
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 600,
            hybrid_risk_factor_threshold: 3,
            reference_case_limit: 3,
            suggestion_limit: 5,
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self { max_recent_messages: 10, max_intent_history: 50 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Compact }
    }
}

impl ResolverConfig {
    /// Minimum partial-match score accepted for an input of `input_chars` chars.
    pub fn partial_threshold(&self, input_chars: usize) -> f64 {
        if input_chars <= self.short_input_chars {
            return self.partial_threshold_short;
        }
        if input_chars >= self.long_input_chars {
            return self.partial_threshold_long;
        }
        let span = (self.long_input_chars - self.short_input_chars) as f64;
        let progress = (input_chars - self.short_input_chars) as f64 / span;
        self.partial_threshold_short
            - (self.partial_threshold_short - self.partial_threshold_long) * progress
    }
}

impl std::str::FromStr for ComparisonPolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "escalate_to_llm" | "escalate" => Ok(Self::EscalateToLlm),
            "trust_rules" | "rules" => Ok(Self::TrustRules),
            other => Err(ConfigError::Validation(format!(
                "unsupported comparison policy `{other}` (expected escalate_to_llm|trust_rules)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("routewise.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(resolver) = patch.resolver {
            if let Some(domain_suffixes) = resolver.domain_suffixes {
                self.resolver.domain_suffixes = domain_suffixes;
            }
            if let Some(extra_suffixes) = resolver.extra_suffixes {
                self.resolver.domain_suffixes.extend(extra_suffixes);
            }
            if let Some(value) = resolver.partial_threshold_short {
                self.resolver.partial_threshold_short = value;
            }
            if let Some(value) = resolver.partial_threshold_long {
                self.resolver.partial_threshold_long = value;
            }
            if let Some(value) = resolver.short_input_chars {
                self.resolver.short_input_chars = value;
            }
            if let Some(value) = resolver.long_input_chars {
                self.resolver.long_input_chars = value;
            }
            if let Some(value) = resolver.ambiguity_gap {
                self.resolver.ambiguity_gap = value;
            }
            if let Some(value) = resolver.context_inherit_max_chars {
                self.resolver.context_inherit_max_chars = value;
            }
            if let Some(value) = resolver.stopwords {
                self.resolver.stopwords = value;
            }
            if let Some(value) = resolver.context_cues {
                self.resolver.context_cues = value;
            }
        }

        if let Some(classifier) = patch.classifier {
            if let Some(value) = classifier.score_floor {
                self.classifier.score_floor = value;
            }
            if let Some(value) = classifier.history_window {
                self.classifier.history_window = value;
            }
            if let Some(value) = classifier.short_input_chars {
                self.classifier.short_input_chars = value;
            }
            if let Some(value) = classifier.multi_intent_threshold {
                self.classifier.multi_intent_threshold = value;
            }
        }

        if let Some(query) = patch.query {
            if let Some(value) = query.llm_escalation_threshold {
                self.query.llm_escalation_threshold = value;
            }
            if let Some(value) = query.comparison_policy {
                self.query.comparison_policy = value;
            }
            if let Some(value) = query.comparison_rule_confidence {
                self.query.comparison_rule_confidence = value;
            }
        }

        if let Some(router) = patch.router {
            if let Some(value) = router.cache_ttl_secs {
                self.router.cache_ttl_secs = value;
            }
            if let Some(value) = router.hybrid_risk_factor_threshold {
                self.router.hybrid_risk_factor_threshold = value;
            }
            if let Some(value) = router.reference_case_limit {
                self.router.reference_case_limit = value;
            }
            if let Some(value) = router.suggestion_limit {
                self.router.suggestion_limit = value;
            }
        }

        if let Some(context) = patch.context {
            if let Some(value) = context.max_recent_messages {
                self.context.max_recent_messages = value;
            }
            if let Some(value) = context.max_intent_history {
                self.context.max_intent_history = value;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("ROUTEWISE_RESOLVER_EXTRA_SUFFIXES") {
            self.resolver.domain_suffixes.extend(
                value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string),
            );
        }
        if let Some(value) = read_env("ROUTEWISE_RESOLVER_AMBIGUITY_GAP") {
            self.resolver.ambiguity_gap = parse_f64("ROUTEWISE_RESOLVER_AMBIGUITY_GAP", &value)?;
        }
        if let Some(value) = read_env("ROUTEWISE_RESOLVER_CONTEXT_INHERIT_MAX_CHARS") {
            self.resolver.context_inherit_max_chars =
                parse_usize("ROUTEWISE_RESOLVER_CONTEXT_INHERIT_MAX_CHARS", &value)?;
        }

        if let Some(value) = read_env("ROUTEWISE_CLASSIFIER_SCORE_FLOOR") {
            self.classifier.score_floor = parse_f64("ROUTEWISE_CLASSIFIER_SCORE_FLOOR", &value)?;
        }
        if let Some(value) = read_env("ROUTEWISE_CLASSIFIER_MULTI_INTENT_THRESHOLD") {
            self.classifier.multi_intent_threshold =
                parse_f64("ROUTEWISE_CLASSIFIER_MULTI_INTENT_THRESHOLD", &value)?;
        }

        if let Some(value) = read_env("ROUTEWISE_QUERY_ESCALATION_THRESHOLD") {
            self.query.llm_escalation_threshold =
                parse_f64("ROUTEWISE_QUERY_ESCALATION_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("ROUTEWISE_QUERY_COMPARISON_POLICY") {
            self.query.comparison_policy = value.parse()?;
        }

        if let Some(value) = read_env("ROUTEWISE_ROUTER_CACHE_TTL_SECS") {
            self.router.cache_ttl_secs = parse_u64("ROUTEWISE_ROUTER_CACHE_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("ROUTEWISE_ROUTER_HYBRID_RISK_THRESHOLD") {
            self.router.hybrid_risk_factor_threshold =
                parse_usize("ROUTEWISE_ROUTER_HYBRID_RISK_THRESHOLD", &value)?;
        }

        if let Some(value) = read_env("ROUTEWISE_CONTEXT_MAX_MESSAGES") {
            self.context.max_recent_messages = parse_usize("ROUTEWISE_CONTEXT_MAX_MESSAGES", &value)?;
        }

        let log_level =
            read_env("ROUTEWISE_LOGGING_LEVEL").or_else(|| read_env("ROUTEWISE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("ROUTEWISE_LOGGING_FORMAT").or_else(|| read_env("ROUTEWISE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(cache_ttl_secs) = overrides.cache_ttl_secs {
            self.router.cache_ttl_secs = cache_ttl_secs;
        }
        if let Some(ambiguity_gap) = overrides.ambiguity_gap {
            self.resolver.ambiguity_gap = ambiguity_gap;
        }
        if let Some(comparison_policy) = overrides.comparison_policy {
            self.query.comparison_policy = comparison_policy;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_resolver(&self.resolver)?;
        validate_classifier(&self.classifier)?;
        validate_query(&self.query)?;
        validate_router(&self.router)?;
        validate_context(&self.context)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("routewise.toml"), PathBuf::from("config/routewise.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn unit_interval(value: f64) -> bool {
    (0.0..=1.0).contains(&value)
}

fn validate_resolver(resolver: &ResolverConfig) -> Result<(), ConfigError> {
    if !unit_interval(resolver.partial_threshold_short) || !unit_interval(resolver.partial_threshold_long)
    {
        return Err(ConfigError::Validation(
            "resolver.partial_threshold_short and resolver.partial_threshold_long must be in range 0.0..=1.0"
                .to_string(),
        ));
    }

    if resolver.short_input_chars >= resolver.long_input_chars {
        return Err(ConfigError::Validation(format!(
            "resolver.short_input_chars ({}) must be smaller than resolver.long_input_chars ({})",
            resolver.short_input_chars, resolver.long_input_chars
        )));
    }

    if !(0.0..0.5).contains(&resolver.ambiguity_gap) {
        return Err(ConfigError::Validation(
            "resolver.ambiguity_gap must be in range 0.0..0.5".to_string(),
        ));
    }

    if resolver.domain_suffixes.iter().any(|suffix| suffix.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "resolver.domain_suffixes must not contain empty entries".to_string(),
        ));
    }

    Ok(())
}

fn validate_classifier(classifier: &ClassifierConfig) -> Result<(), ConfigError> {
    if classifier.score_floor < 0.0 {
        return Err(ConfigError::Validation(
            "classifier.score_floor must not be negative".to_string(),
        ));
    }

    if classifier.history_window == 0 {
        return Err(ConfigError::Validation(
            "classifier.history_window must be greater than zero".to_string(),
        ));
    }

    if !unit_interval(classifier.multi_intent_threshold) {
        return Err(ConfigError::Validation(
            "classifier.multi_intent_threshold must be in range 0.0..=1.0".to_string(),
        ));
    }

    Ok(())
}

fn validate_query(query: &QueryConfig) -> Result<(), ConfigError> {
    if !unit_interval(query.llm_escalation_threshold) {
        return Err(ConfigError::Validation(
            "query.llm_escalation_threshold must be in range 0.0..=1.0".to_string(),
        ));
    }

    if !unit_interval(query.comparison_rule_confidence) {
        return Err(ConfigError::Validation(
            "query.comparison_rule_confidence must be in range 0.0..=1.0".to_string(),
        ));
    }

    if query.comparison_policy == ComparisonPolicy::EscalateToLlm
        && query.comparison_rule_confidence > query.llm_escalation_threshold
    {
        return Err(ConfigError::Validation(
            "query.comparison_rule_confidence must not exceed query.llm_escalation_threshold when comparison_policy is escalate_to_llm"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_router(router: &RouterConfig) -> Result<(), ConfigError> {
    if router.cache_ttl_secs == 0 || router.cache_ttl_secs > 86_400 {
        return Err(ConfigError::Validation(
            "router.cache_ttl_secs must be in range 1..=86400".to_string(),
        ));
    }

    if router.suggestion_limit == 0 {
        return Err(ConfigError::Validation(
            "router.suggestion_limit must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_context(context: &ContextConfig) -> Result<(), ConfigError> {
    if context.max_recent_messages == 0 || context.max_intent_history == 0 {
        return Err(ConfigError::Validation(
            "context.max_recent_messages and context.max_intent_history must be greater than zero"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value.trim().parse::<f64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    resolver: Option<ResolverPatch>,
    classifier: Option<ClassifierPatch>,
    query: Option<QueryPatch>,
    router: Option<RouterPatch>,
    context: Option<ContextPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ResolverPatch {
    domain_suffixes: Option<Vec<String>>,
    extra_suffixes: Option<Vec<String>>,
    partial_threshold_short: Option<f64>,
    partial_threshold_long: Option<f64>,
    short_input_chars: Option<usize>,
    long_input_chars: Option<usize>,
    ambiguity_gap: Option<f64>,
    context_inherit_max_chars: Option<usize>,
    stopwords: Option<Vec<String>>,
    context_cues: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct ClassifierPatch {
    score_floor: Option<f64>,
    history_window: Option<usize>,
    short_input_chars: Option<usize>,
    multi_intent_threshold: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct QueryPatch {
    llm_escalation_threshold: Option<f64>,
    comparison_policy: Option<ComparisonPolicy>,
    comparison_rule_confidence: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct RouterPatch {
    cache_ttl_secs: Option<u64>,
    hybrid_risk_factor_threshold: Option<usize>,
    reference_case_limit: Option<usize>,
    suggestion_limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ContextPatch {
    max_recent_messages: Option<usize>,
    max_intent_history: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
