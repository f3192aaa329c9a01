//! VLM backend adapters.
//!
//! Every provider implements [`VlmBackend`]: one request in, one classified
//! [`ProviderResponse`] out, exactly one network call, no retries. Retry,
//! backoff and key rotation live in the client layer above.

mod google;
#[cfg(test)]
pub(crate) mod mock;
mod openai;

pub use google::GoogleBackend;
pub use openai::OpenAiBackend;

use crate::config::BackendConfig;
use crate::error::ConfigError;
use crate::types::{ImageRef, ProviderStatus};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

/// A single VLM request, independent of provider wire format.
#[derive(Debug, Clone)]
pub struct BackendRequest {
    /// The image to read
    pub image: ImageRef,
    /// Text prompt for the model
    pub prompt: String,
    /// Provider model identifier
    pub model: String,
    /// Maximum tokens to generate
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
}

/// Normalized provider response.
///
/// On failure `text` carries a diagnostic message instead of model output.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    pub text: String,
    pub status: ProviderStatus,
    /// HTTP status code, when the call got that far
    pub http_status: Option<u16>,
    /// Round-trip latency in milliseconds
    pub latency_ms: u64,
}

impl ProviderResponse {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            status: ProviderStatus::Success,
            http_status: Some(200),
            latency_ms: 0,
        }
    }

    pub fn failure(status: ProviderStatus, message: impl Into<String>) -> Self {
        Self {
            text: message.into(),
            status,
            http_status: None,
            latency_ms: 0,
        }
    }

    fn with_http_status(mut self, code: u16) -> Self {
        self.http_status = Some(code);
        self
    }

    fn with_latency(mut self, start: Instant) -> Self {
        self.latency_ms = start.elapsed().as_millis() as u64;
        self
    }
}

/// Trait that all VLM providers implement.
///
/// Uses `async_trait` because native async fn in trait is not object-safe
/// (we need `Arc<dyn VlmBackend>` shared across workers).
#[async_trait]
pub trait VlmBackend: Send + Sync {
    /// Provider name for logging (e.g., "google", "openai").
    fn name(&self) -> &str;

    /// Send one request authenticated with `api_key`.
    async fn send(&self, request: &BackendRequest, api_key: &str) -> ProviderResponse;
}

/// Classify a transport-level failure (no HTTP response received).
pub(crate) fn transport_failure(provider: &str, error: &reqwest::Error) -> ProviderResponse {
    let status = if error.is_builder() {
        // A request that cannot be built will never succeed
        ProviderStatus::FatalError
    } else {
        ProviderStatus::TransientError
    };
    ProviderResponse::failure(status, format!("{provider} request failed: {error}"))
}

/// Turn an HTTP response into a `ProviderResponse`.
///
/// Non-2xx codes go through `classify`; 2xx bodies go through `parse`.
pub(crate) async fn read_response(
    provider: &str,
    resp: reqwest::Response,
    start: Instant,
    classify: fn(u16, &str) -> ProviderStatus,
    parse: fn(&str) -> ProviderResponse,
) -> ProviderResponse {
    let code = resp.status().as_u16();
    let body = match resp.text().await {
        Ok(body) => body,
        Err(e) => return transport_failure(provider, &e).with_latency(start),
    };

    let response = if (200..300).contains(&code) {
        parse(&body)
    } else {
        ProviderResponse::failure(classify(code, &body), format!("{provider} HTTP {code}: {body}"))
    };
    response.with_http_status(code).with_latency(start)
}

/// Factory that creates the configured backend.
pub struct BackendFactory;

impl BackendFactory {
    /// Create a backend from the `[backend]` config section.
    pub fn create(config: &BackendConfig) -> Result<Arc<dyn VlmBackend>, ConfigError> {
        match config.provider.as_str() {
            "google" => {
                let cfg = config.google.clone().unwrap_or_default();
                Ok(Arc::new(GoogleBackend::new(&cfg.endpoint)))
            }
            "openai" => {
                let cfg = config.openai.clone().unwrap_or_default();
                Ok(Arc::new(OpenAiBackend::new(&cfg.endpoint)))
            }
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_creates_google_by_default() {
        let backend = BackendFactory::create(&BackendConfig::default()).unwrap();
        assert_eq!(backend.name(), "google");
    }

    #[test]
    fn test_factory_creates_openai() {
        let config = BackendConfig {
            provider: "openai".to_string(),
            ..BackendConfig::default()
        };
        let backend = BackendFactory::create(&config).unwrap();
        assert_eq!(backend.name(), "openai");
    }

    #[test]
    fn test_factory_rejects_unknown_provider() {
        let config = BackendConfig {
            provider: "anthropic".to_string(),
            ..BackendConfig::default()
        };
        assert!(matches!(
            BackendFactory::create(&config),
            Err(ConfigError::UnknownProvider(name)) if name == "anthropic"
        ));
    }

    #[test]
    fn test_provider_response_constructors() {
        let ok = ProviderResponse::success("Answer: 4 A");
        assert_eq!(ok.status, ProviderStatus::Success);
        let err = ProviderResponse::failure(ProviderStatus::RateLimited, "HTTP 429");
        assert_eq!(err.status, ProviderStatus::RateLimited);
        assert!(err.http_status.is_none());
    }
}
