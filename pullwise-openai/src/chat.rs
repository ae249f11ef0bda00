//! `/chat/completions` adapter

use async_trait::async_trait;
use pullwise_core::providers::{GenerationOptions, LanguageModel};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, OpenAiClient, Result};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Language model for OpenAI-compatible chat completion APIs
#[derive(Debug, Clone)]
pub struct OpenAiChat {
    client: OpenAiClient,
}

impl OpenAiChat {
    pub fn new(client: OpenAiClient) -> Self {
        Self { client }
    }

    /// Send `prompt` as a single user message; returns the text of every choice
    pub async fn complete(&self, prompt: &str, options: &GenerationOptions) -> Result<Vec<String>> {
        let request = ChatRequest {
            model: &options.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        let response: ChatResponse = self.client.post_json("chat/completions", &request).await?;
        debug!(model = %options.model, choices = response.choices.len(), "Completion received");

        Ok(response
            .choices
            .into_iter()
            .map(|c| c.message.content.unwrap_or_default())
            .collect())
    }
}

#[async_trait]
impl LanguageModel for OpenAiChat {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> pullwise_core::Result<Vec<String>> {
        self.complete(prompt, options)
            .await
            .map_err(Error::into_llm_error)
    }
}
