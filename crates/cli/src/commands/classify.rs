use routewise_agent::classifier::ScoredIntent;
use routewise_agent::IntentClassifier;
use routewise_core::domain::intent::IntentResult;
use serde::Serialize;

use crate::commands::{CommandResult, Session};

#[derive(Debug, Serialize)]
struct ClassifyReport {
    input: String,
    result: IntentResult,
    /// Intents that scored at all, best first.
    ranked: Vec<ScoredIntent>,
}

pub fn run(session: &Session, text: &str) -> CommandResult {
    let classifier = IntentClassifier::new(session.config.classifier.clone());
    let classification = classifier.classify_detailed(text, None);
    let ranked =
        classification.ranked.into_iter().filter(|scored| scored.score > 0.0).collect::<Vec<_>>();
    let message = format!(
        "classified as {} ({:.2})",
        classification.result.intent.as_str(),
        classification.result.confidence
    );

    CommandResult::with_data(
        "classify",
        message,
        &ClassifyReport { input: text.to_string(), result: classification.result, ranked },
    )
}
