use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::app::config::ProviderConfig;
use crate::error::{ProviderError, Result};

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Request/response client for one upstream model provider.
///
/// Adapters translate the neutral message list into their native call shape,
/// issue exactly one request and hand back the reply text. A structurally
/// valid but empty reply is returned as an empty string; deciding whether
/// that is usable belongs to the router.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn send_message(&self, messages: &[ChatMessage]) -> ProviderResult<String>;

    /// Cheap synthetic request used to infer whether the provider is reachable.
    async fn health_check(&self) -> ProviderResult<()>;

    fn get_provider_name(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageRole {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "assistant")]
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            _ => None,
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of a provider in the routing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderSlot {
    Primary,
    Secondary,
}

impl ProviderSlot {
    pub const ALL: [ProviderSlot; 2] = [ProviderSlot::Primary, ProviderSlot::Secondary];

    pub fn other(self) -> Self {
        match self {
            ProviderSlot::Primary => ProviderSlot::Secondary,
            ProviderSlot::Secondary => ProviderSlot::Primary,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            ProviderSlot::Primary => 0,
            ProviderSlot::Secondary => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderSlot::Primary => "primary",
            ProviderSlot::Secondary => "secondary",
        }
    }
}

impl fmt::Display for ProviderSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire dialect spoken by a configured provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAI,
    Anthropic,
    Gemini,
}

impl ProviderKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Gemini => "gemini",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "https://api.openai.com",
            ProviderKind::Anthropic => "https://api.anthropic.com",
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com",
        }
    }

    pub fn default_api_key_env(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "OPENAI_API_KEY",
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::Gemini => "GEMINI_API_KEY",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Builds the adapter described by `config`.
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn ModelProvider>> {
    let provider: Arc<dyn ModelProvider> = match config.kind {
        ProviderKind::OpenAI => Arc::new(crate::models::OpenAIProvider::from_config(config)?),
        ProviderKind::Anthropic => Arc::new(crate::models::AnthropicProvider::from_config(config)?),
        ProviderKind::Gemini => Arc::new(crate::models::GeminiProvider::from_config(config)?),
    };
    Ok(provider)
}

/// Sends a prepared JSON request and decodes a successful body as `T`.
///
/// Shared by the adapters so that status and transport failures map onto
/// [`ProviderError`] the same way for every provider.
pub(crate) async fn execute_json<T: DeserializeOwned>(
    provider: &str,
    request: reqwest::RequestBuilder,
    timeout_ms: u64,
) -> ProviderResult<T> {
    let start_time = Instant::now();

    let response = request
        .send()
        .await
        .map_err(|e| ProviderError::from_reqwest(provider, &e, timeout_ms))?;

    let status = response.status();
    debug!("{} responded {} in {:?}", provider, status, start_time.elapsed());

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!("{} API error: {} - {}", provider, status, body);
        return Err(ProviderError::from_status(provider, status.as_u16(), body));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| ProviderError::from_reqwest(provider, &e, timeout_ms))?;

    serde_json::from_slice(&bytes).map_err(|e| ProviderError::malformed(provider, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_role_serde() {
        let message = ChatMessage::user("Hello");
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "Hello");

        let parsed: ChatMessage =
            serde_json::from_str(r#"{"role":"assistant","content":"Hi"}"#).unwrap();
        assert_eq!(parsed, ChatMessage::assistant("Hi"));
    }

    #[test]
    fn test_message_role_parse() {
        assert_eq!(MessageRole::parse("user"), Some(MessageRole::User));
        assert_eq!(MessageRole::parse("assistant"), Some(MessageRole::Assistant));
        assert_eq!(MessageRole::parse("system"), None);
    }

    #[test]
    fn test_slot_other() {
        assert_eq!(ProviderSlot::Primary.other(), ProviderSlot::Secondary);
        assert_eq!(ProviderSlot::Secondary.other(), ProviderSlot::Primary);
        assert_eq!(ProviderSlot::ALL[ProviderSlot::Secondary.index()], ProviderSlot::Secondary);
    }

    #[test]
    fn test_provider_kind_names() {
        let kind: ProviderKind = serde_json::from_str(r#""openai""#).unwrap();
        assert_eq!(kind, ProviderKind::OpenAI);
        assert_eq!(ProviderKind::Anthropic.default_api_key_env(), "ANTHROPIC_API_KEY");
        assert_eq!(ProviderKind::Gemini.to_string(), "gemini");
    }

    #[test]
    fn test_build_provider_uses_configured_kind() {
        let mut config = ProviderConfig::fallback_default();
        config.api_key = Some("test-key".to_string());
        let provider = build_provider(&config).unwrap();
        assert_eq!(provider.get_provider_name(), "anthropic");
    }
}
