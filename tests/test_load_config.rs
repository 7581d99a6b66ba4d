//! Config file loading and env secret merge.

use booking_analytics::load_config::load_config;
use serial_test::serial;
use std::fs;
use tempfile::tempdir;

const MINIMAL_YAML: &str = r#"
data_dir: ./dump
target_event_name: "Cleverly Introduction"
"#;

#[test]
#[serial]
fn loads_yaml_and_merges_api_key_from_env() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("config.yaml");
    fs::write(
        &path,
        r#"
base_url: https://api.example.com/
data_dir: ./dump
target_event_name: "Cleverly Introduction"
http_timeout_secs: 10
max_total_backoff_secs: 120
"#,
    )
    .expect("write config");

    std::env::set_var("CALENDLY_API_KEY", "secret-token");
    let config = load_config(&path).expect("config should load");
    std::env::remove_var("CALENDLY_API_KEY");

    assert_eq!(config.api_key, "secret-token");
    assert_eq!(config.base_url, "https://api.example.com", "trailing slash trimmed");
    assert_eq!(config.target_event_name, "Cleverly Introduction");
    assert_eq!(config.http_timeout_secs, 10);
    assert_eq!(config.max_total_backoff_secs, Some(120));
}

#[test]
#[serial]
fn defaults_apply_when_optional_fields_are_omitted() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("config.yaml");
    fs::write(&path, MINIMAL_YAML).expect("write config");

    std::env::set_var("CALENDLY_API_KEY", "secret-token");
    let config = load_config(&path).expect("config should load");
    std::env::remove_var("CALENDLY_API_KEY");

    assert_eq!(config.base_url, "https://api.calendly.com");
    assert_eq!(config.http_timeout_secs, 30);
    assert_eq!(config.max_total_backoff_secs, None);
}

#[test]
#[serial]
fn missing_api_key_env_is_an_error() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("config.yaml");
    fs::write(&path, MINIMAL_YAML).expect("write config");

    std::env::remove_var("CALENDLY_API_KEY");
    let err = load_config(&path).expect_err("must fail without the secret");
    assert!(err.to_string().contains("CALENDLY_API_KEY"));
}

#[test]
fn missing_config_file_is_an_error() {
    let err = load_config("/nonexistent/config.yaml").expect_err("must fail");
    assert!(err.to_string().contains("Failed to read config file"));
}
