//! Provider liveness cache.
//!
//! Each provider's last known health is reused for a short TTL so routing
//! does not probe before every call. Expired entries are refreshed with a
//! cheap probe; real-call failures mark a provider unhealthy immediately.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::models::provider::{ModelProvider, ProviderSlot};

/// Last known health of one provider.
#[derive(Debug, Clone)]
pub struct ProviderHealth {
    pub healthy: bool,
    pub last_checked_at: Instant,
    pub last_error: Option<String>,
}

impl ProviderHealth {
    /// Optimistic starting state: healthy until evidence says otherwise.
    fn optimistic(now: Instant) -> Self {
        Self {
            healthy: true,
            last_checked_at: now,
            last_error: None,
        }
    }
}

/// Serialisable view of a provider's cached health.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub slot: ProviderSlot,
    pub provider: String,
    pub healthy: bool,
    pub checked_secs_ago: u64,
    pub last_error: Option<String>,
}

struct HealthEntry {
    provider: Arc<dyn ModelProvider>,
    state: Mutex<ProviderHealth>,
    // Serialises probes so concurrent stale readers share one probe.
    probe_gate: tokio::sync::Mutex<()>,
}

pub struct HealthCache {
    entries: [HealthEntry; 2],
    ttl: Duration,
    probe_timeout: Duration,
}

impl HealthCache {
    pub fn new(
        primary: Arc<dyn ModelProvider>,
        secondary: Arc<dyn ModelProvider>,
        ttl: Duration,
        probe_timeout: Duration,
    ) -> Self {
        let now = Instant::now();
        let entry = |provider: Arc<dyn ModelProvider>| HealthEntry {
            provider,
            state: Mutex::new(ProviderHealth::optimistic(now)),
            probe_gate: tokio::sync::Mutex::new(()),
        };

        info!(
            "Health cache tracking {} and {} (ttl {:?}, probe timeout {:?})",
            primary.get_provider_name(),
            secondary.get_provider_name(),
            ttl,
            probe_timeout
        );

        Self {
            entries: [entry(primary), entry(secondary)],
            ttl,
            probe_timeout,
        }
    }

    fn entry(&self, slot: ProviderSlot) -> &HealthEntry {
        &self.entries[slot.index()]
    }

    pub fn provider(&self, slot: ProviderSlot) -> &Arc<dyn ModelProvider> {
        &self.entry(slot).provider
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn cached(&self, entry: &HealthEntry) -> Option<bool> {
        let state = entry.state.lock();
        (state.last_checked_at.elapsed() < self.ttl).then_some(state.healthy)
    }

    /// Cached health while fresh; otherwise probes and caches the result.
    ///
    /// Probe errors and timeouts count as unhealthy and are never returned.
    pub async fn is_healthy(&self, slot: ProviderSlot) -> bool {
        let entry = self.entry(slot);
        if let Some(healthy) = self.cached(entry) {
            return healthy;
        }

        let _gate = entry.probe_gate.lock().await;
        if let Some(healthy) = self.cached(entry) {
            debug!("{} refreshed by a concurrent probe", entry.provider.get_provider_name());
            return healthy;
        }

        self.probe(entry).await
    }

    /// Probes immediately regardless of the TTL.
    pub async fn refresh(&self, slot: ProviderSlot) -> bool {
        let entry = self.entry(slot);
        let _gate = entry.probe_gate.lock().await;
        self.probe(entry).await
    }

    async fn probe(&self, entry: &HealthEntry) -> bool {
        let name = entry.provider.get_provider_name();
        let started = Instant::now();

        let outcome = match timeout(self.probe_timeout, entry.provider.health_check()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "{}: health probe timed out after {:?}",
                name, self.probe_timeout
            )),
        };

        let mut state = entry.state.lock();
        if state.last_checked_at > started {
            // A real-call failure was recorded while probing; keep it.
            debug!("Discarding probe result for {}, newer failure recorded", name);
            return state.healthy;
        }

        state.last_checked_at = Instant::now();
        match outcome {
            Ok(()) => {
                if !state.healthy {
                    info!("Provider {} recovered", name);
                }
                state.healthy = true;
                state.last_error = None;
            }
            Err(error) => {
                warn!("Health probe failed for {}: {}", name, error);
                state.healthy = false;
                state.last_error = Some(error);
            }
        }
        debug!(
            "Probed {} in {:?}: healthy={}",
            name,
            started.elapsed(),
            state.healthy
        );
        state.healthy
    }

    /// Records an observed failure right away, bypassing the TTL.
    pub fn mark_unhealthy(&self, slot: ProviderSlot, reason: impl Into<String>) {
        let entry = self.entry(slot);
        let reason = reason.into();
        warn!(
            "Marking {} provider {} unhealthy: {}",
            slot,
            entry.provider.get_provider_name(),
            reason
        );

        let mut state = entry.state.lock();
        state.healthy = false;
        state.last_checked_at = Instant::now();
        state.last_error = Some(reason);
    }

    pub fn state(&self, slot: ProviderSlot) -> ProviderHealth {
        self.entry(slot).state.lock().clone()
    }

    /// Current cached records, without probing.
    pub fn snapshot(&self) -> Vec<HealthSnapshot> {
        ProviderSlot::ALL
            .iter()
            .map(|&slot| {
                let entry = self.entry(slot);
                let state = entry.state.lock();
                HealthSnapshot {
                    slot,
                    provider: entry.provider.get_provider_name().to_string(),
                    healthy: state.healthy,
                    checked_secs_ago: state.last_checked_at.elapsed().as_secs(),
                    last_error: state.last_error.clone(),
                }
            })
            .collect()
    }
}
