//! OpenAI chat completion client.
//!
//! Thin wrapper around [async-openai] that applies the configured sampling
//! parameters, logs request metadata with the API key masked, and extracts
//! the first choice of the response.

use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use tracing::instrument;

use crate::config::OpenAiConfig;

use super::{ChatModel, Completion, LlmError, MessageRole, PromptMessage};

/// Masks an API key for logging: first 7 chars + "***" + last 4 chars.
/// Keys of 11 characters or fewer are fully masked.
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    let len = chars.len();
    if len <= 11 {
        return "***".to_string();
    }
    let head: String = chars[..7].iter().collect();
    let tail: String = chars[len - 4..].iter().collect();
    format!("{}***{}", head, tail)
}

/// [`ChatModel`] backed by an OpenAI-compatible chat completion endpoint.
#[derive(Clone)]
pub struct OpenAiChatModel {
    client: Arc<Client<OpenAIConfig>>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    presence_penalty: f32,
    frequency_penalty: f32,
    masked_key: String,
}

impl OpenAiChatModel {
    pub fn new(config: &OpenAiConfig) -> Result<Self, LlmError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        let openai_config = OpenAIConfig::new()
            .with_api_key(config.api_key.clone())
            .with_api_base(config.base_url.clone());

        let client = Client::with_config(openai_config).with_http_client(http_client);

        Ok(Self {
            client: Arc::new(client),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            presence_penalty: config.presence_penalty,
            frequency_penalty: config.frequency_penalty,
            masked_key: mask_token(&config.api_key),
        })
    }
}

fn to_openai_message(msg: &PromptMessage) -> Result<ChatCompletionRequestMessage, LlmError> {
    let content = msg.content.clone();
    let message = match msg.role {
        MessageRole::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(content)
            .build()?
            .into(),
        MessageRole::User => ChatCompletionRequestUserMessageArgs::default()
            .content(content)
            .build()?
            .into(),
        MessageRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
            .content(content)
            .build()?
            .into(),
    };
    Ok(message)
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    #[instrument(name = "llm::complete", skip(self, messages), fields(model = %self.model))]
    async fn complete(&self, messages: &[PromptMessage]) -> Result<Completion, LlmError> {
        let openai_messages = messages
            .iter()
            .map(to_openai_message)
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            message_count = openai_messages.len(),
            api_key = %self.masked_key,
            "Sending chat completion request"
        );

        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.as_str())
            .messages(openai_messages)
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .presence_penalty(self.presence_penalty)
            .frequency_penalty(self.frequency_penalty)
            .build()?;

        let response = self.client.chat().create(request).await?;

        let tokens_used = response.usage.as_ref().map(|u| u.total_tokens);
        if let Some(ref usage) = response.usage {
            tracing::debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                "Chat completion usage"
            );
        }

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(LlmError::EmptyResponse)?
            .to_string();

        Ok(Completion {
            content,
            tokens_used,
            model: response.model,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
