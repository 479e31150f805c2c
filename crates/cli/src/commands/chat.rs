use std::io::{BufRead, Write};

use anyhow::Context;
use routewise_agent::{AgentRequest, AgentRuntime};
use routewise_core::domain::execution::Strategy;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::commands::{block_on, CommandResult, Session};

#[derive(Debug, Default, Serialize)]
struct ChatSummary {
    conversation_id: String,
    turns: usize,
    failed_turns: usize,
}

/// One conversation over `input`, one line per user turn. Each turn's envelope
/// is written to `output` as a JSON line as soon as it is routed.
pub fn run(
    session: &Session,
    conversation: Option<String>,
    force: Option<Strategy>,
    input: impl BufRead,
    output: &mut impl Write,
) -> CommandResult {
    let conversation_id = conversation.unwrap_or_else(|| format!("cli-{}", Uuid::new_v4()));
    let runtime = session.runtime();

    block_on("chat", async move {
        match converse(&runtime, conversation_id, force, input, output).await {
            Ok(summary) => {
                let message = format!(
                    "conversation `{}` finished after {} turns",
                    summary.conversation_id, summary.turns
                );
                CommandResult::with_data("chat", message, &summary)
            }
            Err(error) => CommandResult::failure("chat", "chat_io", format!("{error:#}"), 5),
        }
    })
}

async fn converse(
    runtime: &AgentRuntime,
    conversation_id: String,
    force: Option<Strategy>,
    input: impl BufRead,
    output: &mut impl Write,
) -> anyhow::Result<ChatSummary> {
    info!(
        event_name = "cli.chat.started",
        conversation_id = %conversation_id,
        forced_strategy = force.map(|strategy| strategy.as_str()).unwrap_or("none"),
        "chat session started"
    );

    let mut summary = ChatSummary { conversation_id, ..ChatSummary::default() };
    for line in input.lines() {
        let line = line.context("failed to read chat input")?;
        let text = line.trim();
        if text.is_empty() {
            continue;
        }

        let mut request = AgentRequest::new(summary.conversation_id.clone(), text);
        if let Some(strategy) = force {
            request = request.with_strategy(strategy);
        }
        let result = runtime.handle(request).await;

        summary.turns += 1;
        if !result.success {
            summary.failed_turns += 1;
        }
        let rendered = serde_json::to_string(&result).context("failed to serialize turn result")?;
        writeln!(output, "{rendered}").context("failed to write turn result")?;
    }
    output.flush().context("failed to flush chat output")?;

    info!(
        event_name = "cli.chat.finished",
        conversation_id = %summary.conversation_id,
        turns = summary.turns,
        failed_turns = summary.failed_turns,
        "chat session finished"
    );
    Ok(summary)
}
