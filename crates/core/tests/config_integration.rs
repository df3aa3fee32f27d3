//! xrdtest.toml 통합 설정 테스트
//!
//! - xrdtest.toml.example 파싱 테스트
//! - 부분 설정 (일부 섹션만) 로딩 테스트
//! - 환경변수 우선순위 테스트
//! - 빈 파일 / 잘못된 형식 에러 테스트

use xrdtest_core::config::XrdtestConfig;
use xrdtest_core::error::{ConfigError, XrdtestError};

const EXAMPLE: &str = include_str!("../../../xrdtest.toml.example");

// =============================================================================
// xrdtest.toml.example 파싱 테스트
// =============================================================================

#[test]
fn example_config_parses_and_validates() {
    let config = XrdtestConfig::parse(EXAMPLE).expect("example config should parse");
    config.validate().expect("example config should validate");

    assert_eq!(config.general.log_level, "info");
    assert_eq!(config.general.log_format, "pretty");
}

#[test]
fn example_config_matches_code_defaults() {
    let example = XrdtestConfig::parse(EXAMPLE).expect("should parse");
    let defaults = XrdtestConfig::default();

    let r = &example.runner;
    let d = &defaults.runner;
    assert_eq!(r.connect_timeout_secs, d.connect_timeout_secs);
    assert_eq!(r.connect_retry_attempts, d.connect_retry_attempts);
    assert_eq!(r.connect_backoff_base_ms, d.connect_backoff_base_ms);
    assert_eq!(r.connect_backoff_max_ms, d.connect_backoff_max_ms);
    assert_eq!(r.readiness_timeout_secs, d.readiness_timeout_secs);
    assert_eq!(r.readiness_poll_interval_ms, d.readiness_poll_interval_ms);
    assert_eq!(r.client_timeout_secs, d.client_timeout_secs);
    assert_eq!(r.stop_grace_secs, d.stop_grace_secs);
    assert_eq!(r.cleanup_image, d.cleanup_image);
    assert_eq!(r.name_prefix, d.name_prefix);
    assert_eq!(r.ssh_binary, d.ssh_binary);
}

// =============================================================================
// 부분 설정 로딩 테스트
// =============================================================================

#[test]
fn partial_config_general_only() {
    let config = XrdtestConfig::parse("[general]\nlog_level = \"warn\"\n").expect("should parse");

    assert_eq!(config.general.log_level, "warn");
    assert_eq!(config.general.log_format, "pretty");
    assert_eq!(config.runner.client_timeout_secs, 1_800);
}

#[test]
fn partial_config_runner_fields() {
    let toml = r#"
[runner]
client_timeout_secs = 120
cleanup_image = "registry.local/busybox:1.36"
"#;
    let config = XrdtestConfig::parse(toml).expect("should parse");
    config.validate().expect("should validate");

    assert_eq!(config.runner.client_timeout_secs, 120);
    assert_eq!(config.runner.cleanup_image, "registry.local/busybox:1.36");
    assert_eq!(config.runner.stop_grace_secs, 10);
    assert_eq!(config.general.log_level, "info");
}

// =============================================================================
// 환경변수 우선순위 테스트
// =============================================================================

#[test]
#[serial_test::serial]
fn env_override_takes_precedence_over_toml() {
    let original = std::env::var("XRDTEST_GENERAL_LOG_LEVEL").ok();
    // SAFETY: serial 테스트에서만 환경변수를 조작합니다.
    unsafe {
        std::env::set_var("XRDTEST_GENERAL_LOG_LEVEL", "error");
    }

    let mut config = XrdtestConfig::parse("[general]\nlog_level = \"info\"\n").expect("should parse");
    config.apply_env_overrides();
    let result = config.general.log_level.clone();

    // SAFETY: 테스트 정리
    unsafe {
        match original {
            Some(val) => std::env::set_var("XRDTEST_GENERAL_LOG_LEVEL", val),
            None => std::env::remove_var("XRDTEST_GENERAL_LOG_LEVEL"),
        }
    }

    assert_eq!(result, "error");
}

#[test]
#[serial_test::serial]
fn env_override_missing_var_keeps_toml_value() {
    // SAFETY: serial 테스트에서만 환경변수를 조작합니다.
    unsafe {
        std::env::remove_var("XRDTEST_RUNNER_READINESS_TIMEOUT_SECS");
    }

    let mut config =
        XrdtestConfig::parse("[runner]\nreadiness_timeout_secs = 90\n").expect("should parse");
    config.apply_env_overrides();

    assert_eq!(config.runner.readiness_timeout_secs, 90);
}

#[tokio::test]
#[serial_test::serial]
async fn load_applies_env_then_validates() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let path = dir.path().join("xrdtest.toml");
    std::fs::write(&path, "[runner]\nconnect_retry_attempts = 3\n").expect("write");

    // SAFETY: serial 테스트에서만 환경변수를 조작합니다.
    unsafe {
        std::env::set_var("XRDTEST_RUNNER_CONNECT_RETRY_ATTEMPTS", "0");
    }
    let result = XrdtestConfig::load(&path).await;
    // SAFETY: 테스트 정리
    unsafe {
        std::env::remove_var("XRDTEST_RUNNER_CONNECT_RETRY_ATTEMPTS");
    }

    assert!(matches!(
        result,
        Err(XrdtestError::Config(ConfigError::InvalidValue { ref field, .. }))
            if field == "runner.connect_retry_attempts"
    ));
}

// =============================================================================
// 빈 파일 / 잘못된 형식 에러 테스트
// =============================================================================

#[test]
fn empty_and_comment_only_parse_with_defaults() {
    for content in ["", "   \n\t\n", "# nothing here\n# still nothing\n"] {
        let config = XrdtestConfig::parse(content).expect("should parse");
        assert_eq!(config.runner.name_prefix, "xrootd");
    }
}

#[test]
fn malformed_toml_returns_parse_error() {
    let result = XrdtestConfig::parse("[runner\nclient_timeout_secs = 1");
    assert!(matches!(
        result,
        Err(XrdtestError::Config(ConfigError::ParseFailed { .. }))
    ));
}

#[test]
fn wrong_type_for_numeric_field() {
    let result = XrdtestConfig::parse("[runner]\nclient_timeout_secs = \"forever\"\n");
    assert!(matches!(
        result,
        Err(XrdtestError::Config(ConfigError::ParseFailed { .. }))
    ));
}

#[test]
fn unknown_section_is_ignored() {
    let toml = r#"
[general]
log_level = "debug"

[future_section]
enabled = true
"#;
    let config = XrdtestConfig::parse(toml).expect("unknown sections should be ignored");
    assert_eq!(config.general.log_level, "debug");
}

#[tokio::test]
async fn from_file_nonexistent_returns_file_not_found() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let result = XrdtestConfig::from_file(dir.path().join("missing.toml")).await;
    assert!(matches!(
        result,
        Err(XrdtestError::Config(ConfigError::FileNotFound { .. }))
    ));
}

#[tokio::test]
#[serial_test::serial]
async fn load_or_default_without_file_uses_defaults() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let config = XrdtestConfig::load_or_default(dir.path().join("xrdtest.toml"))
        .await
        .expect("missing default file should fall back");
    assert_eq!(config.runner.connect_retry_attempts, 4);
}

#[tokio::test]
async fn load_example_config_from_disk() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../xrdtest.toml.example");
    let config = XrdtestConfig::from_file(path)
        .await
        .expect("example config should load");
    assert_eq!(config.runner.cleanup_image, "busybox");
}
