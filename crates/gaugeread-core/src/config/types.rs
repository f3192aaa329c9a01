//! Sub-configuration structs with their defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// VLM backend selection and generation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Provider identifier: "google" or "openai"
    pub provider: String,

    /// Maximum tokens to generate per answer
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,

    /// Google (Gemini) configuration
    pub google: Option<GoogleConfig>,

    /// OpenAI (or OpenAI-compatible) configuration
    pub openai: Option<OpenAiConfig>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: "google".to_string(),
            max_tokens: 1024,
            temperature: 0.0,
            google: None,
            openai: None,
        }
    }
}

/// Google Gemini configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleConfig {
    /// Base URL of the Generative Language API
    pub endpoint: String,

    /// Model name
    pub model: String,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.5-flash".to_string(),
        }
    }
}

/// OpenAI configuration.
///
/// Point `endpoint` at any Chat Completions compatible server to use a
/// self-hosted model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    /// Full Chat Completions URL
    pub endpoint: String,

    /// Model name
    pub model: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o".to_string(),
        }
    }
}

/// Credential pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// API keys, in rotation order (each supports ${ENV_VAR} syntax).
    /// Empty means: read the provider's default environment variable.
    pub keys: Vec<String>,

    /// Minimum interval between two calls on the same key, in milliseconds
    pub min_interval_ms: u64,

    /// Base cooldown after a rate-limited call, in milliseconds
    pub cooldown_ms: u64,

    /// Base cooldown after an authentication failure, in milliseconds
    pub auth_cooldown_ms: u64,

    /// Upper bound for the exponential cooldown window, in milliseconds
    pub max_cooldown_ms: u64,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            min_interval_ms: 2000,
            cooldown_ms: 10_000,
            auth_cooldown_ms: 300_000,
            max_cooldown_ms: 120_000,
        }
    }
}

/// VLM client retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Max retries for rate-limited and transient failures
    pub max_retries: u32,

    /// Base backoff delay in milliseconds
    pub base_backoff_ms: u64,

    /// Backoff cap in milliseconds
    pub max_backoff_ms: u64,

    /// Random jitter added to each backoff, as a fraction of the delay (0.0 disables)
    pub jitter: f64,

    /// Per-attempt timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            jitter: 0.2,
            timeout_ms: 60_000,
        }
    }
}

/// Batch processing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Number of images read concurrently
    pub parallel_workers: usize,

    /// Directory dataset file names are resolved against.
    /// Unset means: the directory containing the dataset file.
    pub image_root: Option<String>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            parallel_workers: 4,
            image_root: None,
        }
    }
}

/// Evaluation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Allowed distance from a minor tick, as a fraction of the minor tick
    pub tick_tolerance: f64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            tick_tolerance: 0.5,
        }
    }
}

/// Extra unit synonyms, merged over the built-in table.
///
/// Keys are matched case-insensitively; values are the canonical spelling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitsConfig {
    pub synonyms: BTreeMap<String, String>,
}

/// Output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Pretty-print the JSON report
    pub pretty: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { pretty: true }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,

    /// Log format: "pretty" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl ProcessingConfig {
    /// Image root with `~` expanded.
    pub fn image_root_path(&self) -> Option<PathBuf> {
        self.image_root
            .as_deref()
            .map(|root| PathBuf::from(shellexpand::tilde(root).into_owned()))
    }
}
