use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

use crate::app_config::AppConfig;
use crate::error::CompletionError;
use crate::models::MessageRole;

/// One role/content pair of an outbound transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AIMessage {
    pub role: MessageRole,
    pub content: String,
}

impl AIMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A successful completion: the reply identifier and its text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub id: String,
    pub content: String,
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, transcript: &[AIMessage]) -> Result<Completion, CompletionError>;
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [AIMessage],
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    id: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Completion client for DeepSeek and other OpenAI-compatible endpoints.
pub struct AIService {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl AIService {
    pub fn new(
        endpoint: String,
        model: String,
        api_key: String,
        timeout: Duration,
    ) -> Result<Self, CompletionError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("chat-companion/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            model,
            api_key,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, CompletionError> {
        Self::new(
            config.api_url.clone(),
            config.model.clone(),
            config.api_key.clone(),
            config.request_timeout,
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl CompletionClient for AIService {
    async fn complete(&self, transcript: &[AIMessage]) -> Result<Completion, CompletionError> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: transcript,
        };
        debug!(model = %self.model, entries = transcript.len(), "sending completion request");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            error!("Completion API error {}: {}", status, body);
            return Err(CompletionError::Api {
                status: status.as_u16(),
                body,
            });
        }

        parse_completion(&body)
    }
}

/// Extracts the reply id and `choices[0].message.content` from a response body.
pub fn parse_completion(body: &str) -> Result<Completion, CompletionError> {
    let parsed: ChatCompletionResponse = serde_json::from_str(body)
        .map_err(|e| CompletionError::MalformedResponse(e.to_string()))?;

    let id = parsed
        .id
        .ok_or_else(|| CompletionError::MalformedResponse("missing reply id".into()))?;

    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .ok_or_else(|| CompletionError::MalformedResponse("no reply content".into()))?;

    Ok(Completion { id, content })
}
