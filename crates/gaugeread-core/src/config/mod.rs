//! Configuration management for gaugeread.
//!
//! Configuration is loaded from a TOML file in the platform config directory,
//! with defaults for every field. Secrets are referenced as `${ENV_VAR}` and
//! resolved at startup.

mod types;
mod validate;

pub use types::*;

use crate::error::ConfigError;
use crate::units::UnitTable;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration structure for gaugeread.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// VLM backend settings
    pub backend: BackendConfig,

    /// API key pool settings
    pub credentials: CredentialsConfig,

    /// Retry and timeout settings
    pub client: ClientConfig,

    /// Batch processing settings
    pub processing: ProcessingConfig,

    /// Evaluation settings
    pub evaluation: EvaluationConfig,

    /// Unit synonym overrides
    pub units: UnitsConfig,

    /// Output settings
    pub output: OutputConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Returns default configuration if the file doesn't exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path.
    ///
    /// - macOS: ~/Library/Application Support/com.gaugeread.gaugeread/config.toml
    /// - Linux: ~/.config/gaugeread/config.toml
    /// - Windows: C:\Users\<User>\AppData\Roaming\gaugeread\config\config.toml
    ///
    /// Falls back to ~/.gaugeread/config.toml if directory detection fails.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("com", "gaugeread", "gaugeread")
            .map(|dirs| dirs.config_dir().to_path_buf().join("config.toml"))
            .unwrap_or_else(|| {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".gaugeread").join("config.toml")
            })
    }

    /// Serialize the config to a pretty TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    /// Model name for the configured provider, unless overridden.
    pub fn model_name(&self, model_override: Option<&str>) -> String {
        if let Some(model) = model_override {
            return model.to_string();
        }
        match self.backend.provider.as_str() {
            "openai" => self.backend.openai.clone().unwrap_or_default().model,
            _ => self.backend.google.clone().unwrap_or_default().model,
        }
    }

    /// Resolve the credential pool for the configured provider.
    ///
    /// Each configured key may reference an environment variable, and a
    /// resolved value may hold several comma-separated keys. With no keys
    /// configured, the provider's conventional environment variables are used.
    pub fn credential_keys(&self) -> Result<Vec<String>, ConfigError> {
        let provider = self.backend.provider.as_str();
        let env_fallback: &[&str] = match provider {
            "google" => &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
            "openai" => &["OPENAI_API_KEY"],
            other => return Err(ConfigError::UnknownProvider(other.to_string())),
        };

        let mut keys: Vec<String> = self
            .credentials
            .keys
            .iter()
            .filter_map(|k| resolve_env_var(k))
            .flat_map(|v| split_keys(&v))
            .collect();

        if keys.is_empty() {
            keys = env_fallback
                .iter()
                .filter_map(|var| std::env::var(var).ok())
                .flat_map(|v| split_keys(&v))
                .collect();
        }

        // Same key listed twice would defeat rotation.
        let mut seen = std::collections::HashSet::new();
        keys.retain(|k| seen.insert(k.clone()));

        if keys.is_empty() {
            return Err(ConfigError::MissingCredentials {
                provider: provider.to_string(),
                hint: env_fallback.join(" or "),
            });
        }
        Ok(keys)
    }

    /// Build the unit synonym table, with configured overrides applied.
    pub fn unit_table(&self) -> UnitTable {
        UnitTable::default().with_overrides(&self.units.synonyms)
    }
}

/// Resolve `${ENV_VAR}` references in config strings.
pub fn resolve_env_var(value: &str) -> Option<String> {
    if value.starts_with("${") && value.ends_with('}') {
        let var_name = &value[2..value.len() - 1];
        std::env::var(var_name).ok().filter(|v| !v.trim().is_empty())
    } else if value.trim().is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn split_keys(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(String::from)
        .collect()
}
