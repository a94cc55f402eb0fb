//! Engine configuration.
//!
//! Layered with the `config` crate: built-in defaults, then an optional file,
//! then `STOCKROOM__*` environment variables (`__` separates sections, e.g.
//! `STOCKROOM__RETRY__MAX_ATTEMPTS=8`).

use std::path::Path;
use std::time::Duration;

use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

use stockroom_observability::LogSettings;

use crate::retry::{BackoffStrategy, RetryPolicy};

pub const ENV_PREFIX: &str = "STOCKROOM";
pub const DEFAULT_CONFIRMATION_PHRASE: &str = "RESET ALL INVENTORY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct RetrySettings {
    #[validate(range(max = 100))]
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub strategy: BackoffStrategy,
    #[validate(range(min = 0.0, max = 1.0))]
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            strategy: policy.strategy,
            jitter: policy.jitter,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms.max(self.base_delay_ms)),
            strategy: self.strategy,
            jitter: self.jitter,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ResetSettings {
    /// Phrase the caller must repeat to confirm a master reset.
    #[validate(length(min = 1))]
    pub confirmation_phrase: String,
}

impl Default for ResetSettings {
    fn default() -> Self {
        Self {
            confirmation_phrase: DEFAULT_CONFIRMATION_PHRASE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct EngineConfig {
    #[serde(default)]
    #[validate(nested)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub log: LogSettings,
    #[serde(default)]
    #[validate(nested)]
    pub reset: ResetSettings,
}

impl EngineConfig {
    /// Load from defaults, an optional file and the process environment.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_builder(Self::builder(file)?.add_source(Self::environment()))
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
    }

    fn builder(
        file: Option<&Path>,
    ) -> Result<::config::ConfigBuilder<::config::builder::DefaultState>, ConfigError> {
        let defaults = Self::default();
        let mut builder = Config::builder()
            .set_default("retry.max_attempts", i64::from(defaults.retry.max_attempts))?
            .set_default("retry.base_delay_ms", defaults.retry.base_delay_ms as i64)?
            .set_default("retry.max_delay_ms", defaults.retry.max_delay_ms as i64)?
            .set_default("retry.strategy", "exponential")?
            .set_default("retry.jitter", defaults.retry.jitter)?
            .set_default("log.format", "json")?
            .set_default("log.filter", defaults.log.filter.clone())?
            .set_default("reset.confirmation_phrase", defaults.reset.confirmation_phrase)?;

        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(false));
        }
        Ok(builder)
    }

    fn from_builder(
        builder: ::config::ConfigBuilder<::config::builder::DefaultState>,
    ) -> Result<Self, ConfigError> {
        let config: EngineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use ::config::FileFormat;

    use super::*;

    #[test]
    fn defaults_without_sources() {
        let config = EngineConfig::from_builder(EngineConfig::builder(None).unwrap()).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.retry.policy(), RetryPolicy::default());
    }

    #[test]
    fn file_then_environment_layering() {
        let toml = r#"
            [retry]
            max_attempts = 2
            strategy = "linear"

            [reset]
            confirmation_phrase = "WIPE"
        "#;
        let env: HashMap<String, String> = [
            ("STOCKROOM__RETRY__MAX_ATTEMPTS".to_string(), "8".to_string()),
            ("STOCKROOM__LOG__FORMAT".to_string(), "pretty".to_string()),
        ]
        .into_iter()
        .collect();

        let builder = EngineConfig::builder(None)
            .unwrap()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .add_source(EngineConfig::environment().source(Some(env)));
        let config = EngineConfig::from_builder(builder).unwrap();

        assert_eq!(config.retry.max_attempts, 8);
        assert_eq!(config.retry.strategy, BackoffStrategy::Linear);
        assert_eq!(config.reset.confirmation_phrase, "WIPE");
        assert_eq!(config.log.format, stockroom_observability::LogFormat::Pretty);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let builder = EngineConfig::builder(None)
            .unwrap()
            .add_source(File::from_str("[retry]\njitter = 2.5", FileFormat::Toml));
        assert!(matches!(
            EngineConfig::from_builder(builder),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let config = EngineConfig::load(Some(Path::new("/nonexistent/stockroom.toml"))).unwrap();
        assert!(config.retry.max_attempts <= 100);
    }
}
