//! Configuration validation with range checks.

use crate::error::ConfigError;

use super::Config;

const KNOWN_PROVIDERS: &[&str] = &["google", "openai"];

impl Config {
    /// Validate configuration values are within acceptable ranges.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if !KNOWN_PROVIDERS.contains(&self.backend.provider.as_str()) {
            return Err(ConfigError::UnknownProvider(self.backend.provider.clone()));
        }
        if self.backend.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "backend.max_tokens must be > 0".into(),
            ));
        }
        if !(0.0..=2.0).contains(&self.backend.temperature) {
            return Err(ConfigError::ValidationError(
                "backend.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.processing.parallel_workers == 0 {
            return Err(ConfigError::ValidationError(
                "processing.parallel_workers must be > 0".into(),
            ));
        }
        if self.client.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "client.timeout_ms must be > 0".into(),
            ));
        }
        if self.client.max_backoff_ms < self.client.base_backoff_ms {
            return Err(ConfigError::ValidationError(
                "client.max_backoff_ms must be >= client.base_backoff_ms".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.client.jitter) {
            return Err(ConfigError::ValidationError(
                "client.jitter must be between 0.0 and 1.0".into(),
            ));
        }
        if self.credentials.max_cooldown_ms < self.credentials.cooldown_ms {
            return Err(ConfigError::ValidationError(
                "credentials.max_cooldown_ms must be >= credentials.cooldown_ms".into(),
            ));
        }
        let tolerance = self.evaluation.tick_tolerance;
        if !(tolerance > 0.0 && tolerance <= 0.5) {
            return Err(ConfigError::ValidationError(
                "evaluation.tick_tolerance must be in (0.0, 0.5]".into(),
            ));
        }
        if let Some((from, _)) = self
            .units
            .synonyms
            .iter()
            .find(|(from, to)| from.trim().is_empty() || to.trim().is_empty())
        {
            return Err(ConfigError::ValidationError(format!(
                "units.synonyms entry '{from}' must map a non-empty unit to a non-empty unit"
            )));
        }
        Ok(())
    }
}
