use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::app::config::ProviderConfig;
use crate::error::{Error, ProviderError, Result};
use crate::models::provider::{execute_json, ChatMessage, MessageRole, ModelProvider, ProviderResult};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Adapter for the Anthropic Messages API.
pub struct AnthropicProvider {
    client: Client,
    name: String,
    api_key: Option<String>,
    base_url: String,
    model: String,
    probe_model: String,
    max_tokens: u32,
    temperature: Option<f32>,
    system_prompt: Option<String>,
    timeout_ms: u64,
}

impl AnthropicProvider {
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::platform(format!("Failed to create HTTP client: {}", e)))?;

        let name = config.display_name();
        let api_key = config.resolve_api_key();
        if api_key.is_none() {
            warn!("No API key configured for provider {}", name);
        }

        Ok(Self {
            client,
            name,
            api_key,
            base_url: config.base_url(),
            model: config.model.clone(),
            probe_model: config.probe_model().to_string(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            system_prompt: config.system_prompt.clone(),
            timeout_ms: config.timeout_ms(),
        })
    }

    /// Anthropic requires alternating turns starting with the user, so
    /// consecutive same-role messages are merged and a leading assistant
    /// turn is dropped.
    fn convert_messages(&self, messages: &[ChatMessage]) -> Vec<AnthropicMessage> {
        let mut anthropic_messages: Vec<AnthropicMessage> = Vec::with_capacity(messages.len());

        for message in messages {
            if anthropic_messages.is_empty() && message.role == MessageRole::Assistant {
                continue;
            }
            match anthropic_messages.last_mut() {
                Some(last) if last.role == message.role.as_str() => {
                    last.content.push_str("\n\n");
                    last.content.push_str(&message.content);
                }
                _ => anthropic_messages.push(AnthropicMessage {
                    role: message.role.as_str().to_string(),
                    content: message.content.clone(),
                }),
            }
        }

        anthropic_messages
    }

    async fn make_request(&self, request: &AnthropicRequest) -> ProviderResult<AnthropicResponse> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::configuration(&self.name, "missing API key"))?;

        debug!("Making {} API request to model: {}", self.name, request.model);

        let builder = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("content-type", "application/json")
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(request);

        execute_json(&self.name, builder, self.timeout_ms).await
    }
}

#[async_trait]
impl ModelProvider for AnthropicProvider {
    async fn send_message(&self, messages: &[ChatMessage]) -> ProviderResult<String> {
        let request = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            messages: self.convert_messages(messages),
            system: self.system_prompt.clone(),
            temperature: self.temperature,
        };

        let response = self.make_request(&request).await?;

        // Only text blocks carry reply text; an empty block list is a valid empty reply.
        let content = response
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        debug!("Received successful response from {}", self.name);
        Ok(content)
    }

    async fn health_check(&self) -> ProviderResult<()> {
        let request = AnthropicRequest {
            model: self.probe_model.clone(),
            max_tokens: 1,
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: "ping".to_string(),
            }],
            system: None,
            temperature: None,
        };

        self.make_request(&request).await.map(|_| ())
    }

    fn get_provider_name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}
