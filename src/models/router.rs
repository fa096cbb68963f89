use serde::Serialize;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::app::config::{HealthConfig, ProvidersConfig};
use crate::error::{Error, ProviderError, ProviderFailure, Result};
use crate::models::health::{HealthCache, HealthSnapshot};
use crate::models::provider::{build_provider, ChatMessage, ModelProvider, ProviderSlot};

/// A successful reply along with the provider that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutedReply {
    pub content: String,
    pub provider: String,
    pub slot: ProviderSlot,
    pub attempts: u8,
}

/// States of a single routing run.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RouteState {
    SelectProvider,
    CallProvider { slot: ProviderSlot, attempt: u8 },
    RetrySecondary { failed: ProviderSlot },
    Success { slot: ProviderSlot, content: String },
    Fail,
}

#[derive(Default)]
struct RouteRun {
    tried: [bool; 2],
    attempts: u8,
    failures: Vec<ProviderFailure>,
}

/// Sends a conversation to the primary provider and falls back to the
/// secondary, using cached health to skip providers known to be down.
pub struct ResponseRouter {
    health: Arc<HealthCache>,
    accept_empty_responses: bool,
}

impl ResponseRouter {
    pub fn new(health: Arc<HealthCache>, accept_empty_responses: bool) -> Self {
        Self {
            health,
            accept_empty_responses,
        }
    }

    pub fn from_config(providers: &ProvidersConfig, health: &HealthConfig) -> Result<Self> {
        let primary = build_provider(&providers.primary)?;
        let secondary = build_provider(&providers.fallback)?;
        info!(
            "Routing to {} with fallback {}",
            primary.get_provider_name(),
            secondary.get_provider_name()
        );

        let cache = HealthCache::new(primary, secondary, health.ttl(), health.probe_timeout());
        Ok(Self::new(Arc::new(cache), providers.accept_empty_responses))
    }

    pub fn health(&self) -> &Arc<HealthCache> {
        &self.health
    }

    pub fn provider(&self, slot: ProviderSlot) -> &Arc<dyn ModelProvider> {
        self.health.provider(slot)
    }

    pub fn health_snapshot(&self) -> Vec<HealthSnapshot> {
        self.health.snapshot()
    }

    /// Makes at most two provider calls and returns the first usable reply.
    pub async fn get_response(&self, messages: &[ChatMessage]) -> Result<RoutedReply> {
        let started = Instant::now();
        let mut run = RouteRun::default();
        let mut state = RouteState::SelectProvider;

        loop {
            state = match state {
                RouteState::Success { slot, content } => {
                    let provider = self.provider(slot).get_provider_name().to_string();
                    info!(
                        "Reply from {} ({}) after {} attempt(s) in {:?}",
                        provider,
                        slot,
                        run.attempts,
                        started.elapsed()
                    );
                    return Ok(RoutedReply {
                        content,
                        provider,
                        slot,
                        attempts: run.attempts,
                    });
                }
                RouteState::Fail => {
                    warn!("All providers failed after {} attempt(s)", run.attempts);
                    return Err(Error::AllProvidersFailed {
                        failures: run.failures,
                    });
                }
                other => self.step(other, &mut run, messages).await,
            };
        }
    }

    async fn step(
        &self,
        state: RouteState,
        run: &mut RouteRun,
        messages: &[ChatMessage],
    ) -> RouteState {
        match state {
            RouteState::SelectProvider => {
                let slot = if self.health.is_healthy(ProviderSlot::Primary).await {
                    ProviderSlot::Primary
                } else if self.health.is_healthy(ProviderSlot::Secondary).await {
                    ProviderSlot::Secondary
                } else {
                    debug!("No provider reported healthy, trying primary anyway");
                    ProviderSlot::Primary
                };
                RouteState::CallProvider { slot, attempt: 1 }
            }
            RouteState::CallProvider { slot, attempt } => {
                run.tried[slot.index()] = true;
                run.attempts = attempt;

                let provider = self.provider(slot);
                let name = provider.get_provider_name();
                debug!("Attempt {} using {} ({})", attempt, name, slot);

                let outcome = match provider.send_message(messages).await {
                    Ok(content) if content.is_empty() && !self.accept_empty_responses => {
                        Err(ProviderError::EmptyResponse {
                            provider: name.to_string(),
                        })
                    }
                    other => other,
                };

                match outcome {
                    Ok(content) => RouteState::Success { slot, content },
                    Err(error) => {
                        self.health.mark_unhealthy(slot, error.to_string());
                        run.failures.push(ProviderFailure {
                            provider: name.to_string(),
                            error,
                        });
                        if attempt == 1 {
                            RouteState::RetrySecondary { failed: slot }
                        } else {
                            RouteState::Fail
                        }
                    }
                }
            }
            RouteState::RetrySecondary { failed } => {
                let next = failed.other();
                if run.tried[next.index()] {
                    RouteState::Fail
                } else {
                    info!("Falling back from {} to {}", failed, next);
                    RouteState::CallProvider {
                        slot: next,
                        attempt: 2,
                    }
                }
            }
            terminal @ (RouteState::Success { .. } | RouteState::Fail) => terminal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::testing::ScriptedProvider;
    use std::time::Duration;

    fn router(
        primary: &Arc<ScriptedProvider>,
        secondary: &Arc<ScriptedProvider>,
        accept_empty: bool,
    ) -> ResponseRouter {
        let cache = HealthCache::new(
            primary.clone(),
            secondary.clone(),
            Duration::from_secs(30),
            Duration::from_secs(10),
        );
        ResponseRouter::new(Arc::new(cache), accept_empty)
    }

    fn hello() -> Vec<ChatMessage> {
        vec![ChatMessage::user("hello")]
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_primary_answers() {
        let primary = ScriptedProvider::replying("a", "from a");
        let secondary = ScriptedProvider::replying("b", "from b");
        let router = router(&primary, &secondary, false);

        let reply = router.get_response(&hello()).await.unwrap();
        assert_eq!(reply.content, "from a");
        assert_eq!(reply.provider, "a");
        assert_eq!(reply.slot, ProviderSlot::Primary);
        assert_eq!(reply.attempts, 1);
        assert_eq!(secondary.send_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unhealthy_secondary_is_never_called_when_primary_works() {
        let primary = ScriptedProvider::replying("a", "from a");
        let secondary = ScriptedProvider::replying("b", "from b");
        let router = router(&primary, &secondary, false);
        router.health().mark_unhealthy(ProviderSlot::Secondary, "down");

        for _ in 0..3 {
            router.get_response(&hello()).await.unwrap();
        }
        assert_eq!(primary.send_calls(), 3);
        assert_eq!(secondary.send_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_secondary_health_check_keeps_traffic_on_primary() {
        let primary = ScriptedProvider::replying("a", "from a");
        let secondary = ScriptedProvider::replying("b", "from b");
        secondary.set_probe_ok(false);
        let router = router(&primary, &secondary, false);

        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(30)).await;
            assert!(!router.health().is_healthy(ProviderSlot::Secondary).await);

            let reply = router.get_response(&hello()).await.unwrap();
            assert_eq!(reply.slot, ProviderSlot::Primary);
            assert_eq!(reply.attempts, 1);
        }

        assert_eq!(primary.probe_calls(), 3);
        assert_eq!(primary.send_calls(), 3);
        assert_eq!(secondary.probe_calls(), 3);
        assert_eq!(secondary.send_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_primary_health_check_routes_to_secondary() {
        let primary = ScriptedProvider::replying("a", "from a");
        let secondary = ScriptedProvider::replying("b", "from b");
        primary.set_probe_ok(false);
        let router = router(&primary, &secondary, false);

        tokio::time::advance(Duration::from_secs(30)).await;
        let reply = router.get_response(&hello()).await.unwrap();

        assert_eq!(reply.slot, ProviderSlot::Secondary);
        assert_eq!(reply.content, "from b");
        assert_eq!(reply.attempts, 1);
        assert_eq!(primary.probe_calls(), 1);
        assert_eq!(primary.send_calls(), 0);
        assert_eq!(secondary.probe_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_failure_falls_back_once() {
        let primary = ScriptedProvider::failing("a");
        let secondary = ScriptedProvider::replying("b", "from b");
        let router = router(&primary, &secondary, false);

        let reply = router.get_response(&hello()).await.unwrap();
        assert_eq!(reply.content, "from b");
        assert_eq!(reply.slot, ProviderSlot::Secondary);
        assert_eq!(reply.attempts, 2);
        assert_eq!(primary.send_calls(), 1);
        assert_eq!(secondary.send_calls(), 1);
        assert!(!router.health().state(ProviderSlot::Primary).healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_marked_primary_is_skipped_on_next_request() {
        let primary = ScriptedProvider::failing("a");
        let secondary = ScriptedProvider::replying("b", "from b");
        let router = router(&primary, &secondary, false);

        router.get_response(&hello()).await.unwrap();
        let reply = router.get_response(&hello()).await.unwrap();

        assert_eq!(reply.slot, ProviderSlot::Secondary);
        assert_eq!(reply.attempts, 1);
        assert_eq!(primary.send_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_both_failing_makes_exactly_two_calls() {
        let primary = ScriptedProvider::failing("a");
        let secondary = ScriptedProvider::failing("b");
        let router = router(&primary, &secondary, false);

        let err = router.get_response(&hello()).await.unwrap_err();
        match err {
            Error::AllProvidersFailed { failures } => {
                assert_eq!(failures.len(), 2);
                assert_eq!(failures[0].provider, "a");
                assert_eq!(failures[1].provider, "b");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(primary.send_calls(), 1);
        assert_eq!(secondary.send_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_both_unhealthy_uses_primary_as_last_resort() {
        let primary = ScriptedProvider::replying("a", "from a");
        let secondary = ScriptedProvider::replying("b", "from b");
        let router = router(&primary, &secondary, false);
        router.health().mark_unhealthy(ProviderSlot::Primary, "down");
        router.health().mark_unhealthy(ProviderSlot::Secondary, "down");

        let reply = router.get_response(&hello()).await.unwrap();
        assert_eq!(reply.slot, ProviderSlot::Primary);
        assert_eq!(secondary.send_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_secondary_first_falls_back_to_primary() {
        let primary = ScriptedProvider::replying("a", "from a");
        let secondary = ScriptedProvider::failing("b");
        let router = router(&primary, &secondary, false);
        router.health().mark_unhealthy(ProviderSlot::Primary, "down");

        let reply = router.get_response(&hello()).await.unwrap();
        assert_eq!(reply.slot, ProviderSlot::Primary);
        assert_eq!(reply.attempts, 2);
        assert_eq!(secondary.send_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_reply_counts_as_failure() {
        let primary = ScriptedProvider::replying("a", "");
        let secondary = ScriptedProvider::replying("b", "from b");
        let router = router(&primary, &secondary, false);

        let reply = router.get_response(&hello()).await.unwrap();
        assert_eq!(reply.provider, "b");
        let state = router.health().state(ProviderSlot::Primary);
        assert!(state.last_error.unwrap().contains("empty response"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_reply_accepted_when_configured() {
        let primary = ScriptedProvider::replying("a", "");
        let secondary = ScriptedProvider::replying("b", "from b");
        let router = router(&primary, &secondary, true);

        let reply = router.get_response(&hello()).await.unwrap();
        assert_eq!(reply.provider, "a");
        assert_eq!(reply.content, "");
        assert_eq!(secondary.send_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_are_forwarded_unchanged() {
        let primary = ScriptedProvider::replying("a", "ok");
        let secondary = ScriptedProvider::replying("b", "ok");
        let router = router(&primary, &secondary, false);

        let messages = vec![
            ChatMessage::user("one"),
            ChatMessage::assistant("two"),
            ChatMessage::user("three"),
        ];
        router.get_response(&messages).await.unwrap();
        assert_eq!(primary.last_messages(), messages);
    }
}
