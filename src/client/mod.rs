//! Reasoning service access.
//!
//! Stages talk to the language model only through [`ReasoningClient`], so the
//! HTTP backend, the offline responder, and test doubles are interchangeable.

mod http;
mod offline;
mod parsing;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{LlmProvider, LlmSettings};
use crate::error::ReasoningError;

pub use http::{AIClient, ChatChoice, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ChatMessageRole};
pub use offline::OfflineReasoningClient;
pub use parsing::extract_json_object;

#[async_trait]
pub trait ReasoningClient: Send + Sync {
    /// Sends one system + user prompt pair and returns the raw reply text.
    /// Empty or whitespace-only replies are reported as [`ReasoningError::Empty`].
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, ReasoningError>;
}

pub type DynReasoningClient = dyn ReasoningClient;

pub fn build_client(settings: &LlmSettings) -> Result<Arc<DynReasoningClient>> {
    match settings.provider {
        LlmProvider::Offline => Ok(Arc::new(OfflineReasoningClient::new())),
        LlmProvider::OpenAi | LlmProvider::DeepInfra => Ok(Arc::new(AIClient::new(settings)?)),
    }
}

#[cfg(test)]
mod tests;
