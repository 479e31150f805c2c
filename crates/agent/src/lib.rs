//! Agent routing for merchant-operations conversations.
//!
//! One turn flows through a fixed pipeline:
//! 1. **Entity resolution** (`resolver`) - map free text to a registry entity,
//!    inheriting the conversation's subject for short follow-ups
//! 2. **Intent classification** (`classifier`) - weighted keyword rules with
//!    context adjustments, optionally a ranked multi-intent pass by the model
//! 3. **Query structuring** (`structurer`) - analytic questions become a
//!    `StructuredQuery`, rules first and the model only when rules are unsure
//! 4. **Strategy selection** (`strategy`) - skills, llm or hybrid
//! 5. **Execution** (`runtime`) - run the strategy, degrade on any model
//!    failure, cache skill output, record the turn (`context`, `cache`)
//!
//! # Key Types
//!
//! - `AgentRuntime` - main orchestrator, built with `AgentRuntime::builder`
//! - `LlmClient` - optional generative capability; every path works without it
//! - `Skill` / `SkillRegistry` - deterministic local analytics
//!
//! # Degradation
//!
//! The model never holds the only path to an answer. Unavailability or a
//! failed call always lands on the skills path or a canned reply, and
//! `metadata.data_source` reports the path that actually produced the content.

pub mod cache;
pub mod classifier;
pub mod context;
pub mod llm;
pub mod normalize;
pub mod prompts;
pub mod resolver;
pub mod runtime;
pub mod skills;
pub mod strategy;
pub mod structurer;

pub use cache::{CacheKey, CacheStats, ResponseCache};
pub use classifier::IntentClassifier;
pub use context::{ContextManager, TurnRecord};
pub use llm::{ChatMessage, ChatOptions, ChatRole, LlmClient, LlmResponse};
pub use resolver::EntityResolver;
pub use runtime::{AgentRequest, AgentRuntime, AgentRuntimeBuilder};
pub use strategy::{StrategyDecision, StrategySelector};
pub use structurer::QueryStructurer;
