use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::app::config::ProviderConfig;
use crate::error::{Error, ProviderError, Result};
use crate::models::provider::{execute_json, ChatMessage, ModelProvider, ProviderResult};

/// Adapter for OpenAI-compatible `/v1/chat/completions` endpoints.
pub struct OpenAIProvider {
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

impl OpenAIProvider {
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

    fn create_headers(&self) -> ProviderResult<HeaderMap> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::configuration(&self.name, "missing API key"))?;

        let mut headers = HeaderMap::new();
        let auth_value = HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|e| ProviderError::configuration(&self.name, format!("invalid API key format: {}", e)))?;
        headers.insert(AUTHORIZATION, auth_value);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Ok(headers)
    }

    fn convert_messages(&self, messages: &[ChatMessage]) -> Vec<OpenAIMessage> {
        let system = self.system_prompt.iter().map(|prompt| OpenAIMessage {
            role: "system".to_string(),
            content: prompt.clone(),
        });

        system
            .chain(messages.iter().map(|msg| OpenAIMessage {
                role: msg.role.as_str().to_string(),
                content: msg.content.clone(),
            }))
            .collect()
    }

    async fn make_request(&self, request: &OpenAIRequest) -> ProviderResult<OpenAIResponse> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let headers = self.create_headers()?;

        debug!(
            "Sending request to {}: model={}, messages={}",
            self.name,
            request.model,
            request.messages.len()
        );

        execute_json(
            &self.name,
            self.client.post(&url).headers(headers).json(request),
            self.timeout_ms,
        )
        .await
    }

    fn extract_reply(&self, response: OpenAIResponse) -> ProviderResult<String> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::malformed(&self.name, "no choices in response"))?;

        Ok(choice.message.content.unwrap_or_default())
    }
}

#[async_trait]
impl ModelProvider for OpenAIProvider {
    async fn send_message(&self, messages: &[ChatMessage]) -> ProviderResult<String> {
        let request = OpenAIRequest {
            model: self.model.clone(),
            messages: self.convert_messages(messages),
            max_tokens: Some(self.max_tokens),
            temperature: self.temperature,
        };

        let response = self.make_request(&request).await?;
        if let Some(id) = &response.id {
            debug!("Received response from {}: id={}", self.name, id);
        }
        self.extract_reply(response)
    }

    async fn health_check(&self) -> ProviderResult<()> {
        let request = OpenAIRequest {
            model: self.probe_model.clone(),
            messages: vec![OpenAIMessage {
                role: "user".to_string(),
                content: "ping".to_string(),
            }],
            max_tokens: Some(1),
            temperature: None,
        };

        self.make_request(&request).await.map(|_| ())
    }

    fn get_provider_name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    id: Option<String>,
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
}
