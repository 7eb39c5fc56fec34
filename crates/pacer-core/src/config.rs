//! Queue configuration.
//!
//! Every field has a default, so an empty TOML document is a valid config:
//!
//! ```toml
//! max_concurrent = 3
//! retry_limit = 3
//! base_retry_delay_ms = 1000
//! backoff_multiplier = 2.0
//! # max_priority_boost = 5
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::queue::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    /// Concurrency slots.
    pub max_concurrent: usize,

    /// Retries allowed after the first attempt. 0 disables retrying.
    pub retry_limit: u32,

    /// Delay before the first retry.
    pub base_retry_delay_ms: u64,

    /// Growth factor between consecutive retry delays.
    pub backoff_multiplier: f64,

    /// Upper bound on the priority boost a retried request accumulates.
    /// Unbounded when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_priority_boost: Option<u32>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            retry_limit: 3,
            base_retry_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_priority_boost: None,
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidMultiplier(self.backoff_multiplier));
        }
        Ok(())
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: QueueConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    pub fn base_retry_delay(&self) -> Duration {
        Duration::from_millis(self.base_retry_delay_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retry_limit: self.retry_limit,
            base_delay: self.base_retry_delay(),
            multiplier: self.backoff_multiplier,
            max_priority_boost: self.max_priority_boost,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn empty_document_gives_defaults() {
        let config = QueueConfig::from_toml_str("").unwrap();
        assert_eq!(config, QueueConfig::default());
        assert_eq!(config.max_concurrent, 3);
        assert_eq!(config.retry_limit, 3);
        assert_eq!(config.base_retry_delay(), Duration::from_millis(1000));
    }

    #[test]
    fn partial_document_overrides_fields() {
        let config = QueueConfig::from_toml_str(
            r#"
            max_concurrent = 1
            retry_limit = 0
            max_priority_boost = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.max_concurrent, 1);
        assert_eq!(config.retry_limit, 0);
        assert_eq!(config.max_priority_boost, Some(2));
        assert_eq!(config.base_retry_delay_ms, 1000);
    }

    #[rstest]
    #[case("max_concurrent = 0", "max_concurrent")]
    #[case("backoff_multiplier = 0.5", "backoff_multiplier")]
    #[case("max_concurent = 2", "unknown field")]
    #[case("retry_limit = -1", "parse")]
    fn invalid_documents_are_rejected(#[case] source: &str, #[case] needle: &str) {
        let err = QueueConfig::from_toml_str(source).unwrap_err();
        assert!(
            err.to_string().contains(needle),
            "expected {needle:?} in {err}"
        );
    }

    #[test]
    fn retry_policy_mirrors_config() {
        let config = QueueConfig {
            retry_limit: 5,
            base_retry_delay_ms: 250,
            max_priority_boost: Some(1),
            ..QueueConfig::default()
        };
        let policy = config.retry_policy();

        assert_eq!(policy.retry_limit, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
        assert_eq!(policy.multiplier, 2.0);
        assert_eq!(policy.max_priority_boost, Some(1));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = QueueConfig::load("/definitely/not/here/pacer.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
