//! Integration tests for configuration loading and validation

#![allow(clippy::expect_used, clippy::unwrap_used)]

use euicc_bridge::config::{BridgeConfig, ServerConfig, MAX_PAYLOAD_SIZE};
use euicc_bridge::error::BridgeError;
use euicc_bridge::utils::compression::CompressionKind;
use std::io::Write;
use std::time::Duration;
use tracing::Level;

#[test]
fn test_default_config_validates() {
    let config = BridgeConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {errors:?}"
    );
}

#[test]
fn test_defaults_match_documented_values() {
    let config = BridgeConfig::default();
    assert_eq!(config.server.bind_address, "0.0.0.0");
    assert_eq!(config.server.bind_port, 8080);
    assert_eq!(config.server.buffer_size, 2048);
    assert_eq!(config.server.session_timeout, Duration::from_secs(60));
    assert_eq!(config.server.reaper_interval, Duration::from_secs(10));
    assert_eq!(config.client.buffer_size, 2048);
    assert_eq!(config.logging.log_level, Level::INFO);
}

#[test]
fn test_invalid_bind_address() {
    let mut config = BridgeConfig::default();
    config.server.bind_address = "not-an-ip".to_string();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid bind address")));
    assert!(matches!(
        config.server.socket_addr(),
        Err(BridgeError::Config(_))
    ));
}

#[test]
fn test_buffer_size_bounds() {
    let mut config = BridgeConfig::default();
    config.server.buffer_size = 16;
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Buffer size too small")));

    config.server.buffer_size = MAX_PAYLOAD_SIZE + 1;
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Buffer size too large")));
}

#[test]
fn test_short_timeouts_rejected() {
    let config = BridgeConfig {
        server: ServerConfig {
            session_timeout: Duration::from_millis(5),
            reaper_interval: Duration::from_millis(1),
            ..ServerConfig::default()
        },
        ..BridgeConfig::default()
    };

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Session timeout too short")));
    assert!(errors.iter().any(|e| e.contains("Reaper interval too short")));

    let strict = config.validate_strict().unwrap_err().to_string();
    assert!(strict.contains("Configuration validation failed"));
}

#[test]
fn test_partial_toml_keeps_defaults() {
    let config = BridgeConfig::from_toml(
        r#"
        [server]
        bind_address = "127.0.0.1"
        bind_port = 9000
        buffer_size = 4096
        session_timeout = 120000
        reaper_interval = 5000

        [transport]
        compression_enabled = true
        compression_kind = "zstd"
        compression_threshold_bytes = 256

        [logging]
        log_level = "debug"
        json_format = true
        "#,
    )
    .unwrap();

    assert_eq!(config.server.bind_port, 9000);
    assert_eq!(config.server.session_timeout, Duration::from_secs(120));
    assert_eq!(config.transport.compression_kind, CompressionKind::Zstd);
    assert_eq!(config.logging.log_level, Level::DEBUG);
    assert!(config.logging.json_format);
    // [client] omitted entirely
    assert_eq!(config.client.server_address, "127.0.0.1:8080");
}

#[test]
fn test_invalid_toml_is_config_error() {
    let result = BridgeConfig::from_toml("[server]\nbind_port = \"eighty\"");
    assert!(matches!(result, Err(BridgeError::Config(_))));

    let result = BridgeConfig::from_toml("[logging]\nlog_level = \"loud\"\njson_format = false");
    assert!(matches!(result, Err(BridgeError::Config(_))));
}

#[test]
fn test_file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bridge.toml");

    let mut config = BridgeConfig::default();
    config.server.bind_port = 7001;
    config.client.response_timeout = Duration::from_millis(750);
    config.save_to_file(&path).unwrap();

    let loaded = BridgeConfig::from_file(&path).unwrap();
    assert_eq!(loaded.server.bind_port, 7001);
    assert_eq!(loaded.client.response_timeout, Duration::from_millis(750));
}

#[test]
fn test_example_config_parses() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{}", BridgeConfig::example_config()).unwrap();

    let loaded = BridgeConfig::from_file(file.path()).unwrap();
    assert!(loaded.validate().is_empty());
}

#[test]
fn test_missing_file() {
    let result = BridgeConfig::from_file("/nonexistent/bridge.toml");
    assert!(matches!(result, Err(BridgeError::Config(_))));
}
