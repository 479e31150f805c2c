pub mod config;
pub mod domain;
pub mod errors;
pub mod registry;

pub use config::{AppConfig, ConfigError, LoadOptions};
pub use domain::context::{ConversationContext, ContextMessage, IntentRecord, MessageRole};
pub use domain::entity::{Entity, EntityId, EntityResult, MatchKind};
pub use domain::execution::{AgentExecutionResult, ExecutionError, ExecutionMetadata, Strategy};
pub use domain::intent::{Intent, IntentResult, RankedIntent};
pub use domain::query::{
    AggregationOp, AggregationSpec, ComparisonTarget, QueryEntities, QuerySource, QueryType,
    StructuredQuery,
};
pub use errors::{LlmError, RoutingError, RoutingErrorKind, SkillError};
pub use registry::{EntityRegistry, InMemoryRegistry, RegistryError};
