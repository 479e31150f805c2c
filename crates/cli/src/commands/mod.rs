pub mod chat;
pub mod classify;
pub mod config;
pub mod resolve;
pub mod structure;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use routewise_agent::skills::builtin::{
    demo_cases, demo_entities, MetricRiskScanner, StaticCaseLibrary,
};
use routewise_agent::skills::RiskScanner;
use routewise_agent::AgentRuntime;
use routewise_core::config::{AppConfig, LoadOptions};
use routewise_core::registry::{EntityRegistry, InMemoryRegistry};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data: None,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    /// Success carrying a structured body under `data`.
    pub fn with_data(command: &str, message: impl Into<String>, data: &impl Serialize) -> Self {
        let data = match serde_json::to_value(data) {
            Ok(data) => data,
            Err(error) => {
                return Self::failure(command, "serialization", error.to_string(), 6);
            }
        };
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data: Some(data),
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// Where a command reads its config and entities from.
#[derive(Clone, Debug, Default)]
pub struct SessionOptions {
    pub config_path: Option<PathBuf>,
    pub registry_path: Option<PathBuf>,
}

/// Loaded config plus the entity registry every command runs against.
pub struct Session {
    pub config: AppConfig,
    pub config_path: Option<PathBuf>,
    pub registry: Arc<dyn EntityRegistry>,
}

/// `(error_class, message, exit_code)`, the shape `CommandResult::failure` takes.
pub type SetupFailure = (&'static str, String, u8);

impl Session {
    pub fn load(options: &SessionOptions) -> Result<Self, SetupFailure> {
        let config = AppConfig::load(LoadOptions {
            config_path: options.config_path.clone(),
            require_file: options.config_path.is_some(),
            ..LoadOptions::default()
        })
        .map_err(|error| ("config_validation", format!("configuration issue: {error}"), 2))?;

        let registry = match options.registry_path.as_deref() {
            Some(path) => InMemoryRegistry::from_json_file(path),
            None => InMemoryRegistry::new(demo_entities()),
        }
        .map_err(|error| ("registry_load", format!("entity registry issue: {error}"), 3))?;

        Ok(Self {
            config,
            config_path: options.config_path.clone(),
            registry: Arc::new(registry),
        })
    }

    /// The CLI runs without a model: every turn takes the skills path or a canned reply.
    pub fn runtime(&self) -> AgentRuntime {
        let scanner: Arc<dyn RiskScanner> = Arc::new(MetricRiskScanner);
        AgentRuntime::builder(Arc::clone(&self.registry), self.config.clone())
            .risk_scanner(Arc::clone(&scanner))
            .cases(Arc::new(StaticCaseLibrary::new(demo_cases(), scanner)))
            .build()
    }
}

pub fn load_session(command: &str, options: &SessionOptions) -> Result<Session, CommandResult> {
    Session::load(options).map_err(|(error_class, message, exit_code)| {
        CommandResult::failure(command, error_class, message, exit_code)
    })
}

pub(crate) fn block_on<F>(command: &str, future: F) -> CommandResult
where
    F: Future<Output = CommandResult>,
{
    match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime.block_on(future),
        Err(error) => CommandResult::failure(
            command,
            "runtime_init",
            format!("failed to initialize async runtime: {error}"),
            4,
        ),
    }
}
