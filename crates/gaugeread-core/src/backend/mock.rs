//! Scripted backend for unit tests.

use super::{BackendRequest, ProviderResponse, VlmBackend};
use crate::types::ProviderStatus;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Plays back a list of statuses, repeating the last one once exhausted.
///
/// Successful calls answer with `success_text`; failures carry
/// `"scripted <status>"` as their diagnostic.
pub(crate) struct ScriptedBackend {
    script: Vec<ProviderStatus>,
    success_text: String,
    delay: Option<Duration>,
    calls: AtomicU32,
    keys_used: Mutex<Vec<String>>,
    /// (in_flight, max_in_flight)
    in_flight: (Arc<AtomicU32>, Arc<AtomicU32>),
}

impl ScriptedBackend {
    pub(crate) fn new(script: Vec<ProviderStatus>) -> Self {
        Self {
            script,
            success_text: "Answer: 0 psi".to_string(),
            delay: None,
            calls: AtomicU32::new(0),
            keys_used: Mutex::new(Vec::new()),
            in_flight: (Arc::new(AtomicU32::new(0)), Arc::new(AtomicU32::new(0))),
        }
    }

    pub(crate) fn always_success(text: &str) -> Self {
        Self::new(vec![ProviderStatus::Success]).with_text(text)
    }

    pub(crate) fn with_text(mut self, text: &str) -> Self {
        self.success_text = text.to_string();
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn keys_used(&self) -> Vec<String> {
        self.keys_used.lock().unwrap().clone()
    }

    pub(crate) fn max_in_flight(&self) -> u32 {
        self.in_flight.1.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VlmBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, _request: &BackendRequest, api_key: &str) -> ProviderResponse {
        let idx = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        self.keys_used.lock().unwrap().push(api_key.to_string());

        let (in_flight, max_in_flight) = &self.in_flight;
        let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        in_flight.fetch_sub(1, Ordering::SeqCst);

        let status = self
            .script
            .get(idx)
            .or(self.script.last())
            .copied()
            .unwrap_or(ProviderStatus::Success);
        match status {
            ProviderStatus::Success => ProviderResponse::success(self.success_text.clone()),
            other => ProviderResponse::failure(other, format!("scripted {other}")),
        }
    }
}
