use std::sync::Arc;

use routewise_agent::resolver::EntitySuggestion;
use routewise_agent::EntityResolver;
use routewise_core::domain::entity::{EntityId, EntityResult};
use serde::Serialize;

use crate::commands::{CommandResult, Session};

#[derive(Debug, Serialize)]
struct ResolveReport {
    input: String,
    result: EntityResult,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    suggestions: Vec<EntitySuggestion>,
}

pub fn run(session: &Session, text: &str, context_entity: Option<&str>) -> CommandResult {
    let resolver =
        EntityResolver::new(Arc::clone(&session.registry), session.config.resolver.clone());

    let context_id = context_entity.map(EntityId::new);
    if let Some(id) = context_id.as_ref() {
        if !resolver.validate(id) {
            return CommandResult::failure(
                "resolve",
                "invalid_argument",
                format!("context entity `{id}` is not in the registry"),
                5,
            );
        }
    }

    let result = resolver.resolve(text, context_id.as_ref());
    let suggestions = if result.is_matched() {
        Vec::new()
    } else {
        resolver.suggest(text, session.config.router.suggestion_limit)
    };
    let message = match (result.entity_name(), result.match_kind()) {
        (Some(name), Some(kind)) => format!("resolved `{name}` via {}", kind.as_str()),
        _ => "no entity resolved".to_string(),
    };

    CommandResult::with_data(
        "resolve",
        message,
        &ResolveReport { input: text.to_string(), result, suggestions },
    )
}
