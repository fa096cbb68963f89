use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::info;
use validator::Validate;

use crate::error::{Error, Result};
use crate::models::provider::ProviderKind;
use crate::models::rate_limiter::RateLimitConfig;
use crate::platform::AppPaths;

/// Environment variables with this prefix override file settings,
/// e.g. `CHATRELAY__RATE_LIMITING__MAX_REQUESTS=50`.
pub const ENV_PREFIX: &str = "CHATRELAY";

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub providers: ProvidersConfig,
    #[validate(nested)]
    pub health: HealthConfig,
    #[validate(nested)]
    pub rate_limiting: RateLimitingConfig,
    #[validate(nested)]
    pub chat: ChatConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub bind_address: String,
    /// Overrides the platform data directory database when set.
    pub database_url: Option<String>,
    /// Key rate limits on `X-Forwarded-For` / `X-Real-IP`. Only enable
    /// behind a proxy that overwrites those headers.
    pub trust_forwarded_headers: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            database_url: None,
            trust_forwarded_headers: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ProvidersConfig {
    #[validate(nested)]
    pub primary: ProviderConfig,
    #[validate(nested)]
    pub fallback: ProviderConfig,
    /// Whether an empty reply counts as a usable answer.
    pub accept_empty_responses: bool,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            primary: ProviderConfig::primary_default(),
            fallback: ProviderConfig::fallback_default(),
            accept_empty_responses: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ProviderConfig {
    /// Display name used in logs and health reports; defaults to the kind.
    pub name: Option<String>,
    pub kind: ProviderKind,
    #[validate(length(min = 1))]
    pub model: String,
    /// Cheaper model used for health probes; defaults to `model`.
    pub probe_model: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub api_key_env: Option<String>,
    #[validate(range(min = 1))]
    pub timeout_seconds: u64,
    #[validate(range(min = 1))]
    pub max_tokens: u32,
    #[validate(range(min = 0.0, max = 2.0))]
    pub temperature: Option<f32>,
    pub system_prompt: Option<String>,
}

impl ProviderConfig {
    pub fn primary_default() -> Self {
        Self {
            name: None,
            kind: ProviderKind::OpenAI,
            model: "gpt-4o-mini".to_string(),
            probe_model: None,
            base_url: None,
            api_key: None,
            api_key_env: None,
            timeout_seconds: 30,
            max_tokens: 1024,
            temperature: Some(0.7),
            system_prompt: None,
        }
    }

    pub fn fallback_default() -> Self {
        Self {
            kind: ProviderKind::Anthropic,
            model: "claude-3-5-haiku-latest".to_string(),
            ..Self::primary_default()
        }
    }

    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.kind.name().to_string())
    }

    pub fn base_url(&self) -> String {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.kind.default_base_url())
            .trim_end_matches('/')
            .to_string()
    }

    /// Inline key first, then the configured (or the kind's default) env var.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.is_empty()) {
            return Some(key.clone());
        }
        let var = self
            .api_key_env
            .as_deref()
            .unwrap_or_else(|| self.kind.default_api_key_env());
        std::env::var(var).ok().filter(|k| !k.is_empty())
    }

    pub fn probe_model(&self) -> &str {
        self.probe_model.as_deref().unwrap_or(&self.model)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Transport timeout in milliseconds, saturating at `u64::MAX`.
    pub fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout().as_millis()).unwrap_or(u64::MAX)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::primary_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct HealthConfig {
    #[validate(range(min = 1))]
    pub ttl_seconds: u64,
    #[validate(range(min = 1))]
    pub probe_timeout_seconds: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 30,
            probe_timeout_seconds: 10,
        }
    }
}

impl HealthConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RateLimitingConfig {
    pub enabled: bool,
    #[validate(range(min = 1))]
    pub max_requests: u32,
    #[validate(range(min = 1))]
    pub window_ms: u64,
    #[validate(range(min = 1))]
    pub sweep_interval_seconds: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 20,
            window_ms: 60_000,
            sweep_interval_seconds: 300,
        }
    }
}

impl RateLimitingConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ChatConfig {
    /// Number of most recent stored messages sent along with a new message.
    #[validate(range(min = 1))]
    pub history_window: u32,
    #[validate(range(min = 1))]
    pub max_message_length: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_window: 20,
            max_message_length: 32_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub json: bool,
    /// Also write a daily rolling log file under the platform logs directory.
    pub file: bool,
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    pub directive: Option<String>,
}

impl AppConfig {
    /// Layers defaults, the TOML file and `CHATRELAY__*` environment variables.
    ///
    /// An explicit `override_path` must exist; the platform config file is optional.
    pub fn load(paths: &AppPaths, override_path: Option<&Path>) -> Result<Self> {
        let config_file = override_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| paths.config_file());

        info!("Loading configuration from: {:?}", config_file);

        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(
                config::File::from(config_file.as_path())
                    .format(config::FileFormat::Toml)
                    .required(override_path.is_some()),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;

        info!("Configuration loaded successfully");
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        info!("Saving configuration to: {:?}", path);

        let config_content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(config::ConfigError::Message(e.to_string())))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, config_content).await?;

        info!("Configuration saved successfully");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(|e| Error::validation(e.to_string()))?;

        self.server
            .bind_address
            .parse::<SocketAddr>()
            .map_err(|e| {
                Error::validation(format!(
                    "Invalid bind address {}: {}",
                    self.server.bind_address, e
                ))
            })?;

        for (slot, provider) in [
            ("primary", &self.providers.primary),
            ("fallback", &self.providers.fallback),
        ] {
            if let Some(base_url) = &provider.base_url {
                url::Url::parse(base_url).map_err(|e| {
                    Error::validation(format!(
                        "Provider {} has invalid base_url {}: {}",
                        slot, base_url, e
                    ))
                })?;
            }
        }

        Ok(())
    }

    pub fn bind_address(&self) -> Result<SocketAddr> {
        self.server
            .bind_address
            .parse()
            .map_err(|e| Error::validation(format!("Invalid bind address: {}", e)))
    }

    /// Copy safe to print: inline API keys are masked.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        for provider in [&mut config.providers.primary, &mut config.providers.fallback] {
            if provider.api_key.is_some() {
                provider.api_key = Some("********".to_string());
            }
        }
        config
    }

    pub fn to_rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig::new(
            self.rate_limiting.max_requests,
            Duration::from_millis(self.rate_limiting.window_ms),
        )
    }
}
