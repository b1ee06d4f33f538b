use crate::cache::CacheKeyStrategy;
use crate::core::{DbError, Result};
use crate::retry::{self, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Settings for every resilience stage of a query layer.
///
/// Every field has a default, so `{}` is a valid JSON document.
///
/// # Examples
///
/// ```
/// use queryward::LayerConfig;
///
/// let config = LayerConfig::from_json_str(r#"{ "retry": { "max_retries": 5 } }"#).unwrap();
/// assert_eq!(config.retry.max_retries, 5);
/// assert_eq!(config.stream.batch_size, 100);
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerConfig {
    pub retry: RetrySettings,
    pub cache: CacheSettings,
    pub stream: StreamSettings,
    /// Log each query at info level as it reaches a connection.
    pub log_queries: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: retry::DEFAULT_MAX_RETRIES,
            base_delay_ms: retry::DEFAULT_BASE_DELAY.as_millis() as u64,
            max_jitter: retry::DEFAULT_MAX_JITTER,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.base_delay_ms))
            .max_jitter(self.max_jitter)
    }
}

impl From<&RetryPolicy> for RetrySettings {
    fn from(policy: &RetryPolicy) -> Self {
        Self {
            max_retries: policy.max_retries(),
            base_delay_ms: policy.base_delay().as_millis() as u64,
            max_jitter: policy.jitter_range(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    /// Maximum number of entries. `None` keeps every entry forever.
    pub capacity: Option<usize>,
    pub key_strategy: CacheKeyStrategy,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: None,
            key_strategy: CacheKeyStrategy::QueryText,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub batch_size: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl LayerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| DbError::ExecutionError(format!("Invalid layer config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            DbError::ExecutionError(format!("Cannot read config {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    /// Set the retry budget
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    /// Set the base backoff delay
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.retry.base_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn max_jitter(mut self, max_jitter: f64) -> Self {
        self.retry.max_jitter = max_jitter;
        self
    }

    pub fn retry_policy(mut self, policy: &RetryPolicy) -> Self {
        self.retry = RetrySettings::from(policy);
        self
    }

    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.cache.enabled = enabled;
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache.capacity = Some(capacity);
        self
    }

    pub fn cache_key_strategy(mut self, strategy: CacheKeyStrategy) -> Self {
        self.cache.key_strategy = strategy;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.stream.batch_size = batch_size;
        self
    }

    pub fn log_queries(mut self, enabled: bool) -> Self {
        self.log_queries = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.capacity == Some(0) {
            return Err(DbError::ExecutionError(
                "cache.capacity must be > 0 when set".into(),
            ));
        }

        if self.stream.batch_size == 0 {
            return Err(DbError::ExecutionError(
                "stream.batch_size must be > 0".into(),
            ));
        }

        if !self.retry.max_jitter.is_finite() || self.retry.max_jitter < 0.0 {
            return Err(DbError::ExecutionError(
                "retry.max_jitter must be a non-negative number".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LayerConfig::default();
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_delay_ms, 2000);
        assert!(config.cache.enabled);
        assert_eq!(config.cache.capacity, None);
        assert_eq!(config.cache.key_strategy, CacheKeyStrategy::QueryText);
        assert!(!config.log_queries);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = LayerConfig::new()
            .max_retries(1)
            .base_delay(Duration::from_millis(5))
            .cache_capacity(10)
            .batch_size(2)
            .log_queries(true);

        assert_eq!(config.retry.policy().max_attempts(), 2);
        assert_eq!(config.retry.policy().base_delay(), Duration::from_millis(5));
        assert_eq!(config.cache.capacity, Some(10));
        assert_eq!(config.stream.batch_size, 2);
        assert!(config.log_queries);
    }

    #[test]
    fn test_validate() {
        assert!(LayerConfig::new().batch_size(0).validate().is_err());
        assert!(LayerConfig::new().cache_capacity(0).validate().is_err());
        assert!(LayerConfig::new().max_jitter(-0.5).validate().is_err());
        assert!(LayerConfig::new().max_jitter(f64::NAN).validate().is_err());
    }

    #[test]
    fn test_partial_json() {
        let config = LayerConfig::from_json_str(
            r#"{ "cache": { "key_strategy": "query_text_and_params" }, "log_queries": true }"#,
        )
        .unwrap();

        assert!(config.cache.enabled);
        assert_eq!(config.cache.key_strategy, CacheKeyStrategy::QueryTextAndParams);
        assert_eq!(config.retry, RetrySettings::default());
        assert!(config.log_queries);
    }

    #[test]
    fn test_invalid_json_is_rejected() {
        assert!(LayerConfig::from_json_str("{ not json").is_err());
        assert!(LayerConfig::from_json_str(r#"{ "stream": { "batch_size": 0 } }"#).is_err());
    }
}
