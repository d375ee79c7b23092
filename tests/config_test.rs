//! Tests for config module

use std::path::PathBuf;
use std::time::Duration;

use partwise::config::{retention_window, Config, ConfigOptions, DEFAULT_CHUNK_SIZE};

fn test_config(base_url: &str, token: &str) -> Result<std::sync::Arc<Config>, anyhow::Error> {
    Config::new(
        base_url.to_string(),
        token.to_string(),
        ConfigOptions {
            ledger_path: Some(PathBuf::from("/tmp/partwise-test/uploads.json")),
            ..ConfigOptions::default()
        },
    )
}

#[test]
fn test_config_new_with_valid_inputs() {
    let config = test_config("https://gateway.example.com", "test-token").unwrap();
    assert_eq!(config.base_url, "https://gateway.example.com");
    assert_eq!(config.token, "test-token");
}

#[test]
fn test_config_adds_https_prefix() {
    let config = test_config("gateway.example.com", "test-token").unwrap();
    assert_eq!(config.base_url, "https://gateway.example.com");
}

#[test]
fn test_config_keeps_explicit_scheme() {
    let config = test_config("http://localhost:8787", "test-token").unwrap();
    assert_eq!(config.base_url, "http://localhost:8787");
}

#[test]
fn test_config_removes_trailing_slashes() {
    let config = test_config("https://gateway.example.com///", "test-token").unwrap();
    assert_eq!(config.base_url, "https://gateway.example.com");
}

#[test]
fn test_config_empty_inputs_fail() {
    let err = test_config("https://gateway.example.com", "").unwrap_err();
    assert!(err.to_string().contains("token"));

    let err = test_config("   ", "test-token").unwrap_err();
    assert!(err.to_string().contains("base_url"));
}

#[test]
fn test_config_default_values() {
    let config = test_config("https://gateway.example.com", "test-token").unwrap();
    assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
    assert_eq!(config.chunk_size, 10 * 1024 * 1024);
    assert_eq!(config.part_max_attempts, 5);
    assert_eq!(config.max_attempts, 3);
    assert_eq!(config.initial_delay_ms, 1000);
    assert_eq!(config.max_delay_ms, 10_000);
    assert_eq!(config.backoff_factor, 2.0);
    assert_eq!(config.retention_days, 7);
    assert_eq!(config.request_timeout_secs, 300);
    assert_eq!(config.retention().unwrap(), chrono::Duration::days(7));
}

#[test]
fn test_config_with_custom_values() {
    let config = Config::new(
        "https://gateway.example.com".to_string(),
        "test-token".to_string(),
        ConfigOptions {
            chunk_size: Some(5 * 1024 * 1024),
            part_max_attempts: Some(8),
            max_attempts: Some(2),
            initial_delay_ms: Some(200),
            max_delay_ms: Some(1600),
            backoff_factor: Some(3.0),
            retention_days: Some(1),
            request_timeout_secs: Some(30),
            ledger_path: Some(PathBuf::from("/var/lib/partwise/uploads.json")),
        },
    )
    .unwrap();

    assert_eq!(config.chunk_size, 5 * 1024 * 1024);
    assert_eq!(config.request_timeout_secs, 30);
    assert_eq!(
        config.ledger_path,
        PathBuf::from("/var/lib/partwise/uploads.json")
    );

    let policy = config.retry_policy();
    assert_eq!(policy.max_attempts, 2);
    assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
    assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(600));
    assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(1600));

    let part_policy = config.part_retry_policy();
    assert_eq!(part_policy.max_attempts, 8);
    assert_eq!(part_policy.initial_delay_ms, 200);
}

#[test]
fn test_config_rejects_invalid_values() {
    let with = |options: ConfigOptions| {
        Config::new(
            "https://gateway.example.com".to_string(),
            "test-token".to_string(),
            options,
        )
    };

    assert!(with(ConfigOptions {
        chunk_size: Some(0),
        ..ConfigOptions::default()
    })
    .is_err());
    assert!(with(ConfigOptions {
        backoff_factor: Some(0.5),
        ..ConfigOptions::default()
    })
    .is_err());
    assert!(with(ConfigOptions {
        retention_days: Some(0),
        ..ConfigOptions::default()
    })
    .is_err());
    assert!(with(ConfigOptions {
        retention_days: Some(i64::MAX),
        ..ConfigOptions::default()
    })
    .is_err());
}

#[test]
fn test_retention_window_rejects_unusable_values() {
    assert_eq!(retention_window(7).unwrap(), chrono::Duration::days(7));
    assert!(retention_window(0).is_err());
    assert!(retention_window(-1).is_err());
    assert!(retention_window(i64::MAX).is_err());
    assert!(retention_window(i64::MIN).is_err());
}

#[test]
fn test_config_attempts_are_at_least_one() {
    let config = Config::new(
        "https://gateway.example.com".to_string(),
        "test-token".to_string(),
        ConfigOptions {
            part_max_attempts: Some(0),
            max_attempts: Some(0),
            ..ConfigOptions::default()
        },
    )
    .unwrap();
    assert_eq!(config.part_max_attempts, 1);
    assert_eq!(config.max_attempts, 1);
}
