use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::app::config::AppConfig;
use crate::chat::ChatService;
use crate::error::Result;
use crate::models::{RateLimitConfig, RateLimiter, ResponseRouter};
use crate::platform::AppPaths;
use crate::storage::{ConversationRepository, ConversationStatistics, Database};

/// Service-wide counters reported by `GET /api/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    #[serde(flatten)]
    pub conversations: ConversationStatistics,
    pub database_bytes: u64,
    pub rate_limited_clients: usize,
}

/// Everything a request handler or CLI command needs, built once at startup.
pub struct AppState {
    config: Arc<RwLock<AppConfig>>,
    database: Database,
    chat: Arc<ChatService>,
    rate_limiter: Arc<RateLimiter>,
    rate_limit: RateLimitConfig,
}

impl AppState {
    pub async fn new(config: AppConfig, paths: &AppPaths) -> Result<Self> {
        info!("Initializing application state");

        let router = Arc::new(ResponseRouter::from_config(&config.providers, &config.health)?);
        let database = match &config.server.database_url {
            Some(url) => Database::connect(url).await?,
            None => Database::new(paths).await?,
        };

        Ok(Self::with_router(config, database, router))
    }

    /// Assembles state around an already-built router and database.
    pub fn with_router(
        config: AppConfig,
        database: Database,
        router: Arc<ResponseRouter>,
    ) -> Self {
        let repository = ConversationRepository::new(database.pool().clone());
        let chat = Arc::new(ChatService::new(router, repository, config.chat.clone()));
        let rate_limit = config.to_rate_limit_config();

        debug!(
            "Rate limiting {} ({} requests per {:?})",
            if config.rate_limiting.enabled { "enabled" } else { "disabled" },
            rate_limit.max_requests,
            rate_limit.window
        );

        Self {
            config: Arc::new(RwLock::new(config)),
            database,
            chat,
            rate_limiter: Arc::new(RateLimiter::new()),
            rate_limit,
        }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn chat(&self) -> &Arc<ChatService> {
        &self.chat
    }

    pub fn router(&self) -> &Arc<ResponseRouter> {
        self.chat.router()
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// `None` when rate limiting is switched off.
    pub fn rate_limit(&self) -> Option<RateLimitConfig> {
        self.config
            .read()
            .rate_limiting
            .enabled
            .then_some(self.rate_limit)
    }

    /// Whether `X-Forwarded-For` / `X-Real-IP` may identify the client.
    pub fn trust_forwarded_headers(&self) -> bool {
        self.config.read().server.trust_forwarded_headers
    }

    pub async fn stats(&self) -> Result<ServiceStats> {
        Ok(ServiceStats {
            conversations: self.chat.statistics().await?,
            database_bytes: self.database.size_bytes().await?,
            rate_limited_clients: self.rate_limiter.tracked_clients(),
        })
    }

    /// Starts the periodic purge of expired rate-limit windows.
    pub fn start_background_tasks(&self) -> Option<JoinHandle<()>> {
        let config = self.config.read();
        config
            .rate_limiting
            .enabled
            .then(|| self.rate_limiter.spawn_sweeper(config.rate_limiting.sweep_interval()))
    }
}
