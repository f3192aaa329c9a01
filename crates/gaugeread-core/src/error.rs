//! Error types for the gaugeread inference and evaluation engine.
//!
//! Errors are organized by concern. Provider and client failures never abort a
//! batch: the inference engine folds them into failed readings. Configuration
//! and dataset errors are fatal and surface to the caller immediately.

use std::path::PathBuf;
use thiserror::Error;

use crate::types::ProviderStatus;

/// Top-level error type for gaugeread operations.
#[derive(Error, Debug)]
pub enum GaugeError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Dataset loading or validation errors
    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    /// VLM client errors that escaped the inference engine
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    /// General I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file from disk
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse TOML configuration
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Configuration values are invalid
    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    /// No usable API key for the selected provider
    #[error("No credentials configured for provider '{provider}'. Set {hint}.")]
    MissingCredentials { provider: String, hint: String },

    /// Unknown backend provider name
    #[error("Unknown VLM provider: {0}")]
    UnknownProvider(String),
}

/// Dataset loading and validation errors.
#[derive(Error, Debug)]
pub enum DatasetError {
    /// Dataset file could not be read
    #[error("Failed to read dataset {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Dataset file is not valid JSON in the expected shape
    #[error("Failed to parse dataset {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Dataset contains no entries
    #[error("Dataset {0} contains no entries")]
    Empty(PathBuf),

    /// An entry is structurally valid JSON but semantically invalid
    #[error("Invalid dataset entry '{file_name}': {message}")]
    InvalidEntry { file_name: String, message: String },

    /// Two entries share the same file name
    #[error("Duplicate dataset entry: {0}")]
    Duplicate(String),
}

/// Terminal failures of a single `VlmClient::ask` call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    /// Retry budget spent without a successful response
    #[error("Exhausted retries after {attempts} attempts (last status: {last_status}): {message}")]
    ExhaustedRetries {
        attempts: u32,
        last_status: ProviderStatus,
        message: String,
    },

    /// The provider returned a payload that cannot be used; not retried
    #[error("Fatal provider error: {0}")]
    FatalProvider(String),

    /// The batch abort flag was raised before the next attempt
    #[error("Aborted before attempt {0}")]
    Aborted(u32),
}

impl ClientError {
    /// Short machine-readable tag used in failed readings.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::ExhaustedRetries { .. } => "exhausted_retries",
            ClientError::FatalProvider(_) => "fatal_provider",
            ClientError::Aborted(_) => "aborted",
        }
    }
}

/// Convenience type alias for gaugeread results.
pub type Result<T> = std::result::Result<T, GaugeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_kind_tags() {
        let exhausted = ClientError::ExhaustedRetries {
            attempts: 4,
            last_status: ProviderStatus::RateLimited,
            message: "HTTP 429".to_string(),
        };
        assert_eq!(exhausted.kind(), "exhausted_retries");
        assert_eq!(ClientError::FatalProvider("bad".into()).kind(), "fatal_provider");
        assert_eq!(ClientError::Aborted(2).kind(), "aborted");
    }

    #[test]
    fn test_exhausted_retries_message_names_last_status() {
        let err = ClientError::ExhaustedRetries {
            attempts: 3,
            last_status: ProviderStatus::TransientError,
            message: "HTTP 503".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("transient_error"));
    }

    #[test]
    fn test_missing_credentials_hint() {
        let err = ConfigError::MissingCredentials {
            provider: "google".to_string(),
            hint: "GEMINI_API_KEY".to_string(),
        };
        assert!(err.to_string().contains("GEMINI_API_KEY"));
    }
}
