use std::sync::Arc;

use async_trait::async_trait;
use routewise_core::errors::LlmError;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

pub type TokenCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone, Default)]
pub struct ChatOptions {
    pub use_cache: bool,
    pub on_token: Option<TokenCallback>,
}

impl ChatOptions {
    pub fn cached() -> Self {
        Self { use_cache: true, on_token: None }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LlmResponse {
    pub content: String,
}

/// Generative model capability. Hosts may run without one at all, in which
/// case every caller falls back to local paths.
#[async_trait]
pub trait LlmClient: Send + Sync {
    fn is_available(&self) -> bool;

    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<LlmResponse, LlmError>;
}

/// Runs a chat call only when a capability is present and available, and
/// treats blank content as a failure.
pub async fn chat_if_available(
    llm: Option<&dyn LlmClient>,
    messages: &[ChatMessage],
    options: &ChatOptions,
) -> Result<String, LlmError> {
    let llm = llm.filter(|client| client.is_available()).ok_or(LlmError::Unavailable)?;
    let response = llm.chat(messages, options).await?;
    let content = response.content.trim();
    if content.is_empty() {
        return Err(LlmError::EmptyResponse);
    }
    Ok(content.to_string())
}

/// Pulls a JSON payload out of a model reply: a fenced block if present,
/// otherwise the span between the first opening and the last closing bracket.
pub fn extract_json_payload(content: &str, open: char, close: char) -> Option<&str> {
    let body = fenced_body(content).unwrap_or(content);
    let start = body.find(open)?;
    let end = body.rfind(close)?;
    (end > start).then(|| &body[start..=end])
}

fn fenced_body(content: &str) -> Option<&str> {
    let start = content.find("```")?;
    let after_fence = &content[start + 3..];
    let body_start = after_fence.find('\n').map(|index| index + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}
