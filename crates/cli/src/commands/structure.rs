use crate::commands::{block_on, CommandResult, Session};

pub fn run(session: &Session, text: &str) -> CommandResult {
    let runtime = session.runtime();
    block_on("structure", async move {
        let query = runtime.structurer().structure(text, None, runtime.llm()).await;
        let message = format!(
            "structured as {} from {} ({:.2})",
            query.query_type.as_str(),
            query.source.as_str(),
            query.confidence
        );
        CommandResult::with_data("structure", message, &query)
    })
}
