/*!
 * Logging and tracing initialization
 */

use std::fs::File;
use std::path::Path;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::DataLayerConfig;
use crate::error::{DataError, Result};

/// Effective level after applying the verbose flag
pub fn effective_level(config: &DataLayerConfig) -> Level {
    if config.verbose {
        Level::DEBUG
    } else {
        config.log_level.to_tracing_level()
    }
}

/// Build the filter: `RUST_LOG` wins, otherwise both partysync crates at the configured level
pub fn build_env_filter(config: &DataLayerConfig) -> Result<EnvFilter> {
    let level = effective_level(config);
    EnvFilter::try_from_default_env()
        .or_else(|_| {
            EnvFilter::try_new(format!(
                "partysync={},partysync_core_resilience={}",
                level, level
            ))
        })
        .map_err(|e| DataError::Config(format!("Failed to create log filter: {}", e)))
}

/// Initialize structured logging based on configuration
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(config: &DataLayerConfig) -> Result<()> {
    let env_filter = build_env_filter(config)?;

    if let Some(ref log_path) = config.log_file {
        init_file_logging(log_path, env_filter)
    } else {
        init_stdout_logging(env_filter)
    }
}

/// Initialize logging to stdout
fn init_stdout_logging(env_filter: EnvFilter) -> Result<()> {
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_span_events(FmtSpan::NONE)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| DataError::Config(format!("Failed to install subscriber: {}", e)))
}

/// Initialize JSON logging to a file
fn init_file_logging(log_path: &Path, env_filter: EnvFilter) -> Result<()> {
    let file = File::create(log_path)
        .map_err(|e| DataError::Config(format!("Failed to create log file: {}", e)))?;

    let fmt_layer = fmt::layer()
        .with_writer(file)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false) // No ANSI colors in file
        .json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| DataError::Config(format!("Failed to install subscriber: {}", e)))
}

/// Initialize logging with custom format for testing
#[cfg(test)]
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("partysync=debug,partysync_core_resilience=debug"));

        let fmt_layer = fmt::layer().with_test_writer().with_target(false).compact();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .ok(); // Ignore error if already initialized
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;
    use tempfile::NamedTempFile;

    #[test]
    fn test_verbose_overrides_log_level() {
        let config = DataLayerConfig {
            log_level: LogLevel::Error,
            verbose: true,
            ..Default::default()
        };
        assert_eq!(effective_level(&config), Level::DEBUG);

        let config = DataLayerConfig {
            log_level: LogLevel::Warn,
            ..Default::default()
        };
        assert_eq!(effective_level(&config), Level::WARN);
    }

    #[test]
    fn test_build_env_filter() {
        let config = DataLayerConfig::default();
        assert!(build_env_filter(&config).is_ok());
    }

    #[test]
    fn test_file_logging_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("partysync.log");

        let config = DataLayerConfig {
            log_file: Some(log_path.clone()),
            ..Default::default()
        };

        // A subscriber may already be installed by another test in this binary
        let _ = init_logging(&config);
        assert!(log_path.exists());
    }

    #[test]
    fn test_file_logging_bad_path() {
        let file = NamedTempFile::new().unwrap();
        // a path below a regular file cannot be created
        let config = DataLayerConfig {
            log_file: Some(file.path().join("nested.log")),
            ..Default::default()
        };
        let err = init_logging(&config).unwrap_err();
        assert!(err.to_string().contains("Failed to create log file"));
    }
}
