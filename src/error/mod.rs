use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("All providers failed: {}", FailureList(.failures))]
    AllProvidersFailed { failures: Vec<ProviderFailure> },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Chat(#[from] crate::chat::ChatError),
}

impl Error {
    pub fn platform(msg: impl Into<String>) -> Self {
        Error::Platform(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Database(sqlx::Error::RowNotFound))
    }
}

/// Failure reported by a single provider adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("{provider}: transport failure: {message}")]
    Transport { provider: String, message: String },

    #[error("{provider}: request timed out after {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },

    #[error("{provider}: authentication rejected ({status})")]
    Authentication { provider: String, status: u16 },

    #[error("{provider}: rate limited by upstream")]
    RateLimited { provider: String },

    #[error("{provider}: upstream error {status}: {body}")]
    Upstream {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{provider}: malformed response: {message}")]
    MalformedResponse { provider: String, message: String },

    #[error("{provider}: empty response")]
    EmptyResponse { provider: String },

    #[error("{provider}: invalid configuration: {message}")]
    Configuration { provider: String, message: String },
}

impl ProviderError {
    pub fn transport(provider: impl Into<String>, message: impl fmt::Display) -> Self {
        ProviderError::Transport {
            provider: provider.into(),
            message: message.to_string(),
        }
    }

    pub fn malformed(provider: impl Into<String>, message: impl fmt::Display) -> Self {
        ProviderError::MalformedResponse {
            provider: provider.into(),
            message: message.to_string(),
        }
    }

    pub fn configuration(provider: impl Into<String>, message: impl fmt::Display) -> Self {
        ProviderError::Configuration {
            provider: provider.into(),
            message: message.to_string(),
        }
    }

    /// Maps a non-success HTTP status to the matching variant.
    pub fn from_status(provider: impl Into<String>, status: u16, body: String) -> Self {
        let provider = provider.into();
        match status {
            401 | 403 => ProviderError::Authentication { provider, status },
            429 => ProviderError::RateLimited { provider },
            _ => ProviderError::Upstream {
                provider,
                status,
                body,
            },
        }
    }

    /// Classifies a reqwest failure that happened before a status was read.
    pub fn from_reqwest(provider: impl Into<String>, err: &reqwest::Error, timeout_ms: u64) -> Self {
        let provider = provider.into();
        if err.is_timeout() {
            ProviderError::Timeout {
                provider,
                timeout_ms,
            }
        } else if err.is_decode() {
            ProviderError::MalformedResponse {
                provider,
                message: err.to_string(),
            }
        } else {
            ProviderError::Transport {
                provider,
                message: err.to_string(),
            }
        }
    }

    pub fn provider(&self) -> &str {
        match self {
            ProviderError::Transport { provider, .. }
            | ProviderError::Timeout { provider, .. }
            | ProviderError::Authentication { provider, .. }
            | ProviderError::RateLimited { provider }
            | ProviderError::Upstream { provider, .. }
            | ProviderError::MalformedResponse { provider, .. }
            | ProviderError::EmptyResponse { provider }
            | ProviderError::Configuration { provider, .. } => provider,
        }
    }
}

/// One failed attempt recorded by the response router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFailure {
    pub provider: String,
    pub error: ProviderError,
}

struct FailureList<'a>(&'a [ProviderFailure]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("no provider attempted");
        }
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "[{}] {}", failure.provider, failure.error)?;
        }
        Ok(())
    }
}
