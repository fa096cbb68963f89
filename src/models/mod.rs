pub mod anthropic;
pub mod gemini;
pub mod health;
pub mod openai;
pub mod provider;
pub mod rate_limiter;
pub mod router;

#[cfg(test)]
pub(crate) mod testing;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use health::{HealthCache, HealthSnapshot, ProviderHealth};
pub use openai::OpenAIProvider;
pub use provider::{
    build_provider, ChatMessage, MessageRole, ModelProvider, ProviderKind, ProviderResult,
    ProviderSlot,
};
pub use rate_limiter::{RateLimitConfig, RateLimitDecision, RateLimiter};
pub use router::{ResponseRouter, RoutedReply};
