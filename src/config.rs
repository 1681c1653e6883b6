/*!
 * Configuration types for PartySync
 */

use partysync_core_resilience::{
    CircuitBreakerConfig, ErrorClassifier, RetryConfig, DEFAULT_NETWORK_MULTIPLIER,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{DataError, Result};

/// Main configuration for the data layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DataLayerConfig {
    /// Retry policy applied to every remote call
    #[serde(default)]
    pub retry: RetrySettings,

    /// Circuit breaker thresholds (one breaker per repository)
    #[serde(default)]
    pub circuit_breaker: BreakerSettings,

    /// Shared response cache
    #[serde(default)]
    pub cache: CacheSettings,

    /// Request metrics window and export
    #[serde(default)]
    pub metrics: MetricsSettings,

    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,
}

/// Retry policy as written in the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff delay in milliseconds
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Backoff ceiling in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Exponential growth factor
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Randomize delays
    #[serde(default = "default_true")]
    pub use_jitter: bool,

    /// Relative jitter range (0.1 = ±10%)
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,

    /// Per-attempt deadline in milliseconds (None = no deadline)
    #[serde(default)]
    pub attempt_timeout_ms: Option<u64>,

    /// Backoff factor for unreachable-host failures
    #[serde(default = "default_network_multiplier")]
    pub network_multiplier: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            use_jitter: true,
            jitter_factor: default_jitter_factor(),
            attempt_timeout_ms: None,
            network_multiplier: default_network_multiplier(),
        }
    }
}

impl RetrySettings {
    /// Convert into the validated core retry configuration
    pub fn to_retry_config(&self) -> Result<RetryConfig> {
        let builder = RetryConfig::builder()
            .max_retries(self.max_retries)
            .initial_delay(Duration::from_millis(self.initial_delay_ms))
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .backoff_multiplier(self.backoff_multiplier)
            .jitter(self.use_jitter.then_some(self.jitter_factor));

        let builder = match self.attempt_timeout_ms {
            Some(ms) => builder.attempt_timeout(Duration::from_millis(ms)),
            None => builder,
        };
        Ok(builder.build()?)
    }

    /// Classifier whose backoff starts from `initial_delay_ms`
    pub fn to_classifier(&self) -> ErrorClassifier {
        ErrorClassifier::new(
            Duration::from_millis(self.initial_delay_ms),
            self.network_multiplier,
        )
    }
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSettings {
    /// Consecutive failed sequences before the circuit opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Cool-down before a probe is let through, in milliseconds
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

impl BreakerSettings {
    pub fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            cooldown: Duration::from_millis(self.cooldown_ms),
        }
    }
}

/// Response cache sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Disable to always go to the local store / remote
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum number of entries per cache
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    /// Entry lifetime in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Request metrics settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSettings {
    /// Samples kept per endpoint
    #[serde(default = "default_metrics_window")]
    pub window: usize,

    /// Requests slower than this are logged as warnings
    #[serde(default = "default_slow_request_ms")]
    pub slow_request_ms: u64,

    /// Export samples to a Prometheus registry
    #[serde(default)]
    pub prometheus: bool,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            window: default_metrics_window(),
            slow_request_ms: default_slow_request_ms(),
            prometheus: false,
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter_factor() -> f64 {
    0.1
}

fn default_network_multiplier() -> u32 {
    DEFAULT_NETWORK_MULTIPLIER
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_ms() -> u64 {
    60_000 // 1 minute
}

fn default_cache_capacity() -> usize {
    200
}

fn default_cache_ttl_secs() -> u64 {
    300 // 5 minutes
}

fn default_metrics_window() -> usize {
    100
}

fn default_slow_request_ms() -> u64 {
    5000
}

impl DataLayerConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: DataLayerConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            DataError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| DataError::Config(format!("TOML serialize error: {}", e)))
    }

    /// Reject values the data layer cannot run with
    pub fn validate(&self) -> Result<()> {
        self.retry.to_retry_config()?;

        if self.retry.network_multiplier == 0 {
            return Err(DataError::Config(
                "retry.network_multiplier must be at least 1".to_string(),
            ));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(DataError::Config(
                "circuit_breaker.failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.cache.enabled && self.cache.capacity == 0 {
            return Err(DataError::Config(
                "cache.capacity must be at least 1 when the cache is enabled".to_string(),
            ));
        }
        if self.metrics.window == 0 {
            return Err(DataError::Config(
                "metrics.window must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Create a configuration for tests: tiny delays, no jitter
    pub fn fast_preset() -> Self {
        Self {
            retry: RetrySettings {
                initial_delay_ms: 1,
                max_delay_ms: 10,
                use_jitter: false,
                ..Default::default()
            },
            circuit_breaker: BreakerSettings {
                cooldown_ms: 100,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = DataLayerConfig::default();
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.initial_delay_ms, 1000);
        assert_eq!(config.retry.max_delay_ms, 30_000);
        assert!(config.retry.use_jitter);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.cooldown_ms, 60_000);
        assert_eq!(config.cache.capacity, 200);
        assert_eq!(config.cache.ttl(), Duration::from_secs(300));
        assert_eq!(config.metrics.window, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
            log_level = "debug"

            [retry]
            max_retries = 5
            attempt_timeout_ms = 15000

            [cache]
            ttl_secs = 60
        "#;

        let config = DataLayerConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.backoff_multiplier, 2.0);
        assert_eq!(config.cache.ttl_secs, 60);
        assert_eq!(config.cache.capacity, 200);

        let retry = config.retry.to_retry_config().unwrap();
        assert_eq!(retry.attempt_timeout, Some(Duration::from_secs(15)));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = DataLayerConfig::from_toml_str("[retry]\nbackoff_multiplier = 0.5\n").unwrap_err();
        assert!(matches!(err, DataError::Config(_)));

        let err = DataLayerConfig::from_toml_str("[circuit_breaker]\nfailure_threshold = 0\n")
            .unwrap_err();
        assert!(err.to_string().contains("failure_threshold"));

        let err = DataLayerConfig::from_toml_str("[cache]\ncapacity = 0\n").unwrap_err();
        assert!(err.to_string().contains("capacity"));

        let err = DataLayerConfig::from_toml_str("[retry]\nnetwork_multiplier = 0\n").unwrap_err();
        assert!(err.to_string().contains("network_multiplier"));

        let err = DataLayerConfig::from_toml_str("retry = 3").unwrap_err();
        assert!(err.to_string().contains("TOML parse error"));
    }

    #[test]
    fn test_disabled_cache_allows_zero_capacity() {
        let config =
            DataLayerConfig::from_toml_str("[cache]\nenabled = false\ncapacity = 0\n").unwrap();
        assert!(!config.cache.enabled);
    }

    #[test]
    fn test_jitter_toggle_maps_to_core_config() {
        let settings = RetrySettings {
            use_jitter: false,
            ..Default::default()
        };
        let retry = settings.to_retry_config().unwrap();
        assert!(!retry.use_jitter);

        let retry = RetrySettings::default().to_retry_config().unwrap();
        assert!(retry.use_jitter);
        assert_eq!(retry.jitter_factor, 0.1);
    }

    #[test]
    fn test_network_multiplier_feeds_classifier() {
        use partysync_core_resilience::ErrorKind;

        let classifier = RetrySettings::default().to_classifier();
        assert_eq!(
            classifier.retry_delay(ErrorKind::NoNetwork, 0),
            Duration::from_millis(3000)
        );

        let config =
            DataLayerConfig::from_toml_str("[retry]\ninitial_delay_ms = 500\nnetwork_multiplier = 4\n")
                .unwrap();
        assert_eq!(config.retry.network_multiplier, 4);
        assert_eq!(
            config.retry.to_classifier().retry_delay(ErrorKind::NoNetwork, 1),
            Duration::from_millis(4000)
        );
    }

    #[test]
    fn test_load_from_file_and_roundtrip() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "verbose = true\n[metrics]\nprometheus = true").unwrap();

        let config = DataLayerConfig::load(file.path()).unwrap();
        assert!(config.verbose);
        assert!(config.metrics.prometheus);

        let reparsed = DataLayerConfig::from_toml_str(&config.to_toml_string().unwrap()).unwrap();
        assert_eq!(reparsed, config);
    }

    #[test]
    fn test_load_missing_file() {
        let err = DataLayerConfig::load(Path::new("/nonexistent/partysync.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(LogLevel::Error.to_tracing_level(), tracing::Level::ERROR);
        assert_eq!(LogLevel::Trace.to_tracing_level(), tracing::Level::TRACE);
    }
}
