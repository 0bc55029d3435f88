use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{LlmProvider, LlmSettings};
use crate::error::ReasoningError;

use super::ReasoningClient;

/// OpenAI-compatible chat completions client.
#[derive(Debug, Clone)]
pub struct AIClient {
    http: Client,
    base_url: String,
    api_key: String,
    user_agent: String,
    model: String,
    temperature: f32,
    provider: LlmProvider,
}

impl AIClient {
    pub fn new(settings: &LlmSettings) -> Result<Self> {
        let timeout = Duration::from_secs(settings.timeout_secs);
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            user_agent: settings.user_agent.clone(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            provider: settings.provider,
        })
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub async fn chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, ReasoningError> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("User-Agent", &self.user_agent)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|err| ReasoningError::Transport(err.to_string()))?;

        let status = response.status();
        match status {
            StatusCode::OK => response
                .json::<ChatCompletionResponse>()
                .await
                .map_err(|err| ReasoningError::Transport(format!("invalid response body: {err}"))),
            StatusCode::TOO_MANY_REQUESTS => {
                let error_text = response.text().await.unwrap_or_default();
                Err(status_error(
                    status,
                    format!("Rate limit exceeded. Please wait before trying again. ({error_text})"),
                ))
            }
            StatusCode::UNAUTHORIZED => Err(status_error(
                status,
                "Invalid API key. Please check your API key configuration.".to_string(),
            )),
            StatusCode::BAD_REQUEST => {
                let error_text = response.text().await.unwrap_or_default();
                Err(status_error(status, format!("Invalid request: {error_text}")))
            }
            StatusCode::INTERNAL_SERVER_ERROR | StatusCode::SERVICE_UNAVAILABLE => Err(status_error(
                status,
                "Service is temporarily unavailable. Please try again later.".to_string(),
            )),
            _ => {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                Err(status_error(status, error_text))
            }
        }
    }
}

fn status_error(status: StatusCode, message: String) -> ReasoningError {
    ReasoningError::Status {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl ReasoningClient for AIClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, ReasoningError> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: ChatMessageRole::System,
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: ChatMessageRole::User,
                    content: user_prompt.to_string(),
                },
            ],
            max_tokens: None,
            temperature: Some(self.temperature),
        };

        let response = self.chat_completion(request).await?;
        let content = response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(ReasoningError::Empty);
        }

        debug!(model = %self.model, chars = content.len(), "reasoning service replied");
        Ok(content)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatMessageRole,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse {
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
    pub finish_reason: Option<String>,
}
