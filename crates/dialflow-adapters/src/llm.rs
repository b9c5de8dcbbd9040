//! Language-model contract and HTTP implementation.

use crate::error::AdapterError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One turn in a conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// The language-model boundary.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Requests a completion for the full history. Output is capped short by
    /// `max_tokens` since replies are spoken aloud.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, AdapterError>;
}

#[derive(Debug, Deserialize)]
struct HttpCompletionChoice {
    message: HttpCompletionMessage,
}

#[derive(Debug, Deserialize)]
struct HttpCompletionMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct HttpCompletionResponse {
    choices: Vec<HttpCompletionChoice>,
}

/// Chat completion over an OpenAI-compatible HTTP gateway.
#[derive(Debug, Clone)]
pub struct HttpLanguageModel {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpLanguageModel {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl LanguageModel for HttpLanguageModel {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, AdapterError> {
        let body = serde_json::json!({
            "model": model,
            "messages": messages,
            "temperature": temperature,
            "max_tokens": max_tokens,
        });

        let resp = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(AdapterError::Llm(format!(
                "completion failed: HTTP {}",
                resp.status()
            )));
        }

        let parsed: HttpCompletionResponse = resp.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AdapterError::Llm("completion response had no choices".to_string()))
    }
}
