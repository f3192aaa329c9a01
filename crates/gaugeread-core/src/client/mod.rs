//! VLM client: one backend, a credential pool and a retry loop.
//!
//! `ask` is the only entry point the inference engine uses. It acquires a
//! key, makes one bounded call through the backend, reports the outcome to
//! the pool and lets [`RetryState`] decide what happens next.

pub mod retry;

pub use retry::{backoff_duration, RetryDecision, RetryPolicy, RetryState};

use crate::abort::AbortFlag;
use crate::backend::{BackendFactory, BackendRequest, ProviderResponse, VlmBackend};
use crate::clock::Clock;
use crate::config::Config;
use crate::credentials::{CredentialPool, PoolOptions};
use crate::error::{ClientError, ConfigError};
use crate::types::{ImageRef, ProviderStatus};
use std::sync::Arc;
use std::time::Duration;

/// Call parameters shared by every `ask`.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub retry: RetryPolicy,
    /// Upper bound on a single provider call
    pub timeout: Duration,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            timeout: Duration::from_millis(60_000),
            max_tokens: 1024,
            temperature: 0.0,
        }
    }
}

impl ClientOptions {
    pub fn from_config(config: &Config) -> Self {
        let client = &config.client;
        Self {
            retry: RetryPolicy {
                max_retries: client.max_retries,
                base_backoff: Duration::from_millis(client.base_backoff_ms),
                max_backoff: Duration::from_millis(client.max_backoff_ms),
                jitter: client.jitter,
            },
            timeout: Duration::from_millis(client.timeout_ms),
            max_tokens: config.backend.max_tokens,
            temperature: config.backend.temperature,
        }
    }
}

/// Retrying, key-rotating VLM client. Cheap to share behind an `Arc`.
pub struct VlmClient {
    backend: Arc<dyn VlmBackend>,
    pool: Arc<CredentialPool>,
    clock: Arc<dyn Clock>,
    options: ClientOptions,
    abort: AbortFlag,
}

impl VlmClient {
    pub fn new(
        backend: Arc<dyn VlmBackend>,
        pool: Arc<CredentialPool>,
        clock: Arc<dyn Clock>,
        options: ClientOptions,
    ) -> Self {
        Self {
            backend,
            pool,
            clock,
            options,
            abort: AbortFlag::new(),
        }
    }

    /// Build the configured backend and credential pool.
    ///
    /// Fails when the provider is unknown or no key can be resolved.
    pub fn from_config(
        config: &Config,
        clock: Arc<dyn Clock>,
        abort: AbortFlag,
    ) -> Result<Self, ConfigError> {
        let backend = BackendFactory::create(&config.backend)?;
        let keys = config.credential_keys()?;
        let pool = CredentialPool::new(
            keys,
            PoolOptions::from(&config.credentials),
            clock.clone(),
        )?
        .with_abort(abort.clone());

        tracing::debug!(
            "Client ready: provider={}, keys={}",
            backend.name(),
            pool.len()
        );

        Ok(Self::new(
            backend,
            Arc::new(pool),
            clock,
            ClientOptions::from_config(config),
        )
        .with_abort(abort))
    }

    /// Stop retrying once `abort` is raised.
    pub fn with_abort(mut self, abort: AbortFlag) -> Self {
        self.abort = abort;
        self
    }

    pub fn provider(&self) -> &str {
        self.backend.name()
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    /// Send `prompt` and `image` to the model and return its raw text.
    pub async fn ask(
        &self,
        image: &ImageRef,
        prompt: &str,
        model: &str,
    ) -> Result<String, ClientError> {
        let request = BackendRequest {
            image: image.clone(),
            prompt: prompt.to_string(),
            model: model.to_string(),
            max_tokens: self.options.max_tokens,
            temperature: self.options.temperature,
        };
        let mut state = RetryState::default();

        loop {
            if self.abort.is_aborted() {
                return Err(ClientError::Aborted(state.attempts + 1));
            }
            let Some(handle) = self.pool.acquire().await else {
                return Err(ClientError::Aborted(state.attempts + 1));
            };

            tracing::debug!(
                "Attempt {} for {} with {}",
                state.attempts + 1,
                image.file_id,
                handle
            );
            let response = self.send_once(&request, handle.key()).await;
            self.pool.report(&handle, response.status);

            match state.on_response(
                response.status,
                &response.text,
                &self.options.retry,
                self.pool.len(),
            ) {
                RetryDecision::Return => {
                    tracing::debug!(
                        "{} answered for {} in {}ms",
                        self.backend.name(),
                        image.file_id,
                        response.latency_ms
                    );
                    return Ok(response.text);
                }
                RetryDecision::Retry { delay } => {
                    let delay = self.options.retry.with_jitter(delay);
                    tracing::warn!(
                        "{} for {} on {} (attempt {}), retrying in {delay:?}",
                        response.status,
                        image.file_id,
                        handle,
                        state.attempts
                    );
                    if !delay.is_zero() {
                        self.clock.sleep(delay).await;
                    }
                }
                RetryDecision::Fatal => {
                    return Err(ClientError::FatalProvider(response.text));
                }
                RetryDecision::Exhausted => {
                    tracing::warn!(
                        "Giving up on {} after {} attempts: {}",
                        image.file_id,
                        state.attempts,
                        response.status
                    );
                    return Err(state.exhausted_error());
                }
            }
        }
    }

    async fn send_once(&self, request: &BackendRequest, api_key: &str) -> ProviderResponse {
        match tokio::time::timeout(self.options.timeout, self.backend.send(request, api_key)).await
        {
            Ok(response) => response,
            Err(_) => ProviderResponse::failure(
                ProviderStatus::TransientError,
                format!("Timeout after {}ms", self.options.timeout.as_millis()),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::ScriptedBackend;
    use crate::clock::ManualClock;
    use crate::credentials::CredentialState;

    fn image() -> ImageRef {
        ImageRef::from_bytes("gauge.jpg", vec![0xFF, 0xD8], "jpeg")
    }

    fn options(max_retries: u32) -> ClientOptions {
        ClientOptions {
            retry: RetryPolicy {
                max_retries,
                base_backoff: Duration::from_millis(1000),
                max_backoff: Duration::from_millis(30_000),
                jitter: 0.0,
            },
            timeout: Duration::from_secs(5),
            ..ClientOptions::default()
        }
    }

    fn client(
        backend: Arc<ScriptedBackend>,
        keys: &[&str],
        max_retries: u32,
    ) -> (VlmClient, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let pool = CredentialPool::new(
            keys.iter().map(|k| k.to_string()).collect(),
            PoolOptions {
                min_interval: Duration::ZERO,
                ..PoolOptions::default()
            },
            clock.clone(),
        )
        .unwrap();
        let client = VlmClient::new(backend, Arc::new(pool), clock.clone(), options(max_retries));
        (client, clock)
    }

    #[tokio::test]
    async fn test_ask_success_first_try() {
        let backend = Arc::new(ScriptedBackend::always_success("Answer: 42 psi"));
        let (client, clock) = client(backend.clone(), &["key-a"], 3);

        let text = client.ask(&image(), "read", "m").await.unwrap();
        assert_eq!(text, "Answer: 42 psi");
        assert_eq!(backend.calls(), 1);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_rate_limit_rotates_to_next_key() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            ProviderStatus::RateLimited,
            ProviderStatus::Success,
        ]));
        let (client, clock) = client(backend.clone(), &["key-a", "key-b"], 3);

        client.ask(&image(), "read", "m").await.unwrap();
        assert_eq!(backend.keys_used(), vec!["key-a", "key-b"]);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(1000)]);
        assert_eq!(
            client.pool().state_of(0),
            Some(CredentialState::CoolingDown)
        );
    }

    #[tokio::test]
    async fn test_transient_errors_exhaust_budget() {
        let backend = Arc::new(ScriptedBackend::new(vec![ProviderStatus::TransientError]));
        let (client, clock) = client(backend.clone(), &["key-a"], 2);

        let err = client.ask(&image(), "read", "m").await.unwrap_err();
        assert_eq!(
            err,
            ClientError::ExhaustedRetries {
                attempts: 3,
                last_status: ProviderStatus::TransientError,
                message: "scripted transient_error".to_string(),
            }
        );
        assert_eq!(backend.calls(), 3);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(1000), Duration::from_millis(2000)]
        );
    }

    #[tokio::test]
    async fn test_auth_error_switches_key_without_budget() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            ProviderStatus::AuthError,
            ProviderStatus::Success,
        ]));
        let (client, clock) = client(backend.clone(), &["bad-key", "good-key"], 0);

        client.ask(&image(), "read", "m").await.unwrap();
        assert_eq!(backend.keys_used(), vec!["bad-key", "good-key"]);
        assert!(clock.sleeps().is_empty());
        assert_eq!(
            client.pool().state_of(0),
            Some(CredentialState::CoolingDown)
        );
    }

    #[tokio::test]
    async fn test_auth_error_on_every_key_exhausts() {
        let backend = Arc::new(ScriptedBackend::new(vec![ProviderStatus::AuthError]));
        let (client, _clock) = client(backend.clone(), &["a-key", "b-key"], 3);

        let err = client.ask(&image(), "read", "m").await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::ExhaustedRetries {
                attempts: 2,
                last_status: ProviderStatus::AuthError,
                ..
            }
        ));
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_fatal_error_not_retried() {
        let backend = Arc::new(ScriptedBackend::new(vec![ProviderStatus::FatalError]));
        let (client, _clock) = client(backend.clone(), &["key-a"], 3);

        let err = client.ask(&image(), "read", "m").await.unwrap_err();
        assert_eq!(err.kind(), "fatal_provider");
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_abort_before_first_attempt() {
        let backend = Arc::new(ScriptedBackend::always_success("never"));
        let (client, _clock) = client(backend.clone(), &["key-a"], 3);
        let abort = AbortFlag::new();
        let client = client.with_abort(abort.clone());
        abort.abort();

        let err = client.ask(&image(), "read", "m").await.unwrap_err();
        assert_eq!(err, ClientError::Aborted(1));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_transient() {
        let backend = Arc::new(
            ScriptedBackend::always_success("too slow").with_delay(Duration::from_secs(5)),
        );
        let clock = Arc::new(ManualClock::new());
        let pool =
            CredentialPool::new(vec!["key-a".into()], PoolOptions::default(), clock.clone())
                .unwrap();
        let client = VlmClient::new(
            backend,
            Arc::new(pool),
            clock,
            ClientOptions {
                timeout: Duration::from_millis(20),
                ..options(0)
            },
        );

        match client.ask(&image(), "read", "m").await.unwrap_err() {
            ClientError::ExhaustedRetries {
                last_status,
                message,
                ..
            } => {
                assert_eq!(last_status, ProviderStatus::TransientError);
                assert!(message.contains("Timeout"), "got: {message}");
            }
            other => panic!("expected exhausted retries, got {other:?}"),
        }
    }

    #[test]
    fn test_options_from_config() {
        let mut config = Config::default();
        config.client.max_retries = 5;
        config.client.timeout_ms = 1500;
        config.backend.max_tokens = 256;
        let opts = ClientOptions::from_config(&config);
        assert_eq!(opts.retry.max_retries, 5);
        assert_eq!(opts.timeout, Duration::from_millis(1500));
        assert_eq!(opts.max_tokens, 256);
    }
}
