use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::ProviderError;
use crate::models::provider::{ChatMessage, ModelProvider, ProviderResult};

/// In-memory provider whose replies and probe results are set by the test.
pub(crate) struct ScriptedProvider {
    name: String,
    send_outcome: Mutex<ProviderResult<String>>,
    probe_ok: AtomicBool,
    probe_delay: Mutex<Duration>,
    send_calls: AtomicUsize,
    probe_calls: AtomicUsize,
    last_messages: Mutex<Vec<ChatMessage>>,
}

impl ScriptedProvider {
    pub(crate) fn replying(name: &str, reply: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            send_outcome: Mutex::new(Ok(reply.to_string())),
            probe_ok: AtomicBool::new(true),
            probe_delay: Mutex::new(Duration::ZERO),
            send_calls: AtomicUsize::new(0),
            probe_calls: AtomicUsize::new(0),
            last_messages: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn failing(name: &str) -> Arc<Self> {
        let provider = Self::replying(name, "");
        provider.set_send_outcome(Err(ProviderError::Upstream {
            provider: name.to_string(),
            status: 500,
            body: "internal error".to_string(),
        }));
        provider
    }

    pub(crate) fn set_send_outcome(&self, outcome: ProviderResult<String>) {
        *self.send_outcome.lock() = outcome;
    }

    pub(crate) fn set_probe_ok(&self, ok: bool) {
        self.probe_ok.store(ok, Ordering::SeqCst);
    }

    pub(crate) fn set_probe_delay(&self, delay: Duration) {
        *self.probe_delay.lock() = delay;
    }

    pub(crate) fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn probe_calls(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn last_messages(&self) -> Vec<ChatMessage> {
        self.last_messages.lock().clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn send_message(&self, messages: &[ChatMessage]) -> ProviderResult<String> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_messages.lock() = messages.to_vec();
        self.send_outcome.lock().clone()
    }

    async fn health_check(&self) -> ProviderResult<()> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.probe_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.probe_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ProviderError::transport(&self.name, "probe failed"))
        }
    }

    fn get_provider_name(&self) -> &str {
        &self.name
    }
}
