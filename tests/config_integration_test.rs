use partysync::{DataError, DataLayer, DataLayerConfig, LogLevel};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_file_into_layer() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
log_level = "debug"

[retry]
max_retries = 5
initial_delay_ms = 250
max_delay_ms = 8000
use_jitter = false
attempt_timeout_ms = 3000

[circuit_breaker]
failure_threshold = 3
cooldown_ms = 15000

[cache]
capacity = 50
ttl_secs = 30

[metrics]
window = 20
"#
    )
    .unwrap();

    let config = DataLayerConfig::load(file.path()).unwrap();
    assert_eq!(config.log_level, LogLevel::Debug);
    assert_eq!(config.cache.ttl(), Duration::from_secs(30));

    let layer = DataLayer::new(config).unwrap();
    let retry = layer.retry_config();
    assert_eq!(retry.max_retries, 5);
    assert_eq!(retry.initial_delay, Duration::from_millis(250));
    assert!(!retry.use_jitter);
    assert_eq!(retry.attempt_timeout, Some(Duration::from_secs(3)));

    let cache = layer.cache::<u32, String>("groups").unwrap();
    assert_eq!(cache.capacity(), 50);
    assert_eq!(cache.default_ttl(), Duration::from_secs(30));
}

#[test]
fn test_empty_file_uses_defaults() {
    let file = NamedTempFile::new().unwrap();
    let config = DataLayerConfig::load(file.path()).unwrap();
    assert_eq!(config, DataLayerConfig::default());
}

#[test]
fn test_invalid_values_are_config_errors() {
    let err = DataLayerConfig::from_toml_str(
        r#"
        [retry]
        initial_delay_ms = 60000
        max_delay_ms = 1000
        "#,
    )
    .unwrap_err();
    assert!(matches!(err, DataError::Config(_)));

    let err = DataLayerConfig::from_toml_str("[cache]\ncapacity = 0").unwrap_err();
    assert!(err.to_string().contains("cache.capacity"));

    let err = DataLayerConfig::from_toml_str("[retry]\nmax_retries = \"three\"").unwrap_err();
    assert!(err.to_string().contains("TOML parse error"));
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = DataLayerConfig::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(err.to_string().contains("Failed to read"));
}

#[test]
fn test_config_round_trips_through_toml() {
    let config = DataLayerConfig::fast_preset();
    let text = config.to_toml_string().unwrap();
    assert_eq!(DataLayerConfig::from_toml_str(&text).unwrap(), config);
}
