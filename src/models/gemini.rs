use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::app::config::ProviderConfig;
use crate::error::{Error, ProviderError, Result};
use crate::models::provider::{execute_json, ChatMessage, MessageRole, ModelProvider, ProviderResult};

/// Adapter for Google's `generateContent` endpoint.
pub struct GeminiProvider {
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

impl GeminiProvider {
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

    fn convert_messages(&self, messages: &[ChatMessage]) -> Vec<GeminiContent> {
        messages
            .iter()
            .map(|message| GeminiContent {
                role: Some(
                    match message.role {
                        MessageRole::User => "user",
                        MessageRole::Assistant => "model",
                    }
                    .to_string(),
                ),
                parts: vec![GeminiPart {
                    text: Some(message.content.clone()),
                }],
            })
            .collect()
    }

    async fn generate(&self, model: &str, request: &GeminiRequest) -> ProviderResult<GeminiResponse> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::configuration(&self.name, "missing API key"))?;

        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, model);
        debug!("Sending request to {}: model={}", self.name, model);

        let builder = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(request);

        execute_json(&self.name, builder, self.timeout_ms).await
    }
}

#[async_trait]
impl ModelProvider for GeminiProvider {
    async fn send_message(&self, messages: &[ChatMessage]) -> ProviderResult<String> {
        let request = GeminiRequest {
            contents: self.convert_messages(messages),
            system_instruction: self.system_prompt.as_ref().map(|prompt| GeminiContent {
                role: None,
                parts: vec![GeminiPart {
                    text: Some(prompt.clone()),
                }],
            }),
            generation_config: GeminiGenerationConfig {
                max_output_tokens: self.max_tokens,
                temperature: self.temperature,
            },
        };

        let response = self.generate(&self.model, &request).await?;

        let candidate = response
            .candidates
            .and_then(|candidates| candidates.into_iter().next())
            .ok_or_else(|| ProviderError::malformed(&self.name, "no candidates in response"))?;

        let text = candidate
            .content
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        Ok(text)
    }

    async fn health_check(&self) -> ProviderResult<()> {
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts: vec![GeminiPart {
                    text: Some("ping".to_string()),
                }],
            }],
            system_instruction: None,
            generation_config: GeminiGenerationConfig {
                max_output_tokens: 1,
                temperature: None,
            },
        };

        self.generate(&self.probe_model, &request).await.map(|_| ())
    }

    fn get_provider_name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}
