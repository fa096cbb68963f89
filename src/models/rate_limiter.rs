use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Limits applied to every client identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(20, Duration::from_secs(60))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitEntry {
    pub count: u32,
    pub window_reset_at: Instant,
}

impl RateLimitEntry {
    /// The reset instant itself still belongs to the current window.
    fn is_expired(&self, now: Instant) -> bool {
        now > self.window_reset_at
    }
}

/// Outcome of a rate-limit check. A refusal is a value, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub limit: u32,
    pub reset_at: Instant,
}

impl RateLimitDecision {
    /// Time until the current window closes.
    pub fn retry_after(&self) -> Duration {
        self.reset_at.saturating_duration_since(Instant::now())
    }

    /// Whole seconds a refused client should wait, never less than one.
    pub fn retry_after_secs(&self) -> u64 {
        let wait = self.retry_after();
        let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
        secs.max(1)
    }

    /// Wall-clock unix timestamp (seconds) at which the window resets.
    pub fn reset_at_unix(&self) -> i64 {
        let wait = chrono::Duration::from_std(self.retry_after())
            .unwrap_or_else(|_| chrono::Duration::zero());
        (chrono::Utc::now() + wait).timestamp()
    }
}

/// Fixed-window request counter keyed by client identifier.
///
/// Every check runs under one lock, so concurrent requests from the same
/// client can never undercount. A window admits `max_requests`; clients that
/// straddle a window boundary can get up to twice that in a short burst.
#[derive(Debug, Default)]
pub struct RateLimiter {
    entries: Mutex<HashMap<String, RateLimitEntry>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, identifier: &str, config: &RateLimitConfig) -> RateLimitDecision {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        match entries.get_mut(identifier) {
            Some(entry) if !entry.is_expired(now) => {
                entry.count = entry.count.saturating_add(1);

                if entry.count > config.max_requests {
                    debug!(
                        "Rate limit exceeded for {} ({}/{})",
                        identifier, entry.count, config.max_requests
                    );
                    RateLimitDecision {
                        allowed: false,
                        remaining: 0,
                        limit: config.max_requests,
                        reset_at: entry.window_reset_at,
                    }
                } else {
                    RateLimitDecision {
                        allowed: true,
                        remaining: config.max_requests - entry.count,
                        limit: config.max_requests,
                        reset_at: entry.window_reset_at,
                    }
                }
            }
            _ => {
                let entry = RateLimitEntry {
                    count: 1,
                    window_reset_at: now + config.window,
                };
                entries.insert(identifier.to_string(), entry);

                RateLimitDecision {
                    allowed: true,
                    remaining: config.max_requests.saturating_sub(1),
                    limit: config.max_requests,
                    reset_at: entry.window_reset_at,
                }
            }
        }
    }

    /// Drops entries whose window has already closed. Live windows are kept.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.entries.lock().len()
    }

    /// Periodically purges expired entries. The task holds only a weak
    /// reference and stops once the limiter is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let limiter: Weak<Self> = Arc::downgrade(self);
        info!("Starting rate limit sweeper every {:?}", every);

        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(limiter) = limiter.upgrade() else {
                    debug!("Rate limiter dropped, stopping sweeper");
                    break;
                };
                let purged = limiter.purge_expired();
                if purged > 0 {
                    debug!(
                        "Purged {} expired rate limit entries, {} remaining",
                        purged,
                        limiter.tracked_clients()
                    );
                }
            }
        })
    }
}
