//! 설정 관리: xrdtest.toml 파싱 및 런타임 설정
//!
//! [`XrdtestConfig`]는 로깅과 러너 동작을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`XRDTEST_RUNNER_CLIENT_TIMEOUT_SECS=600` 형식)
//! 3. 설정 파일 (`xrdtest.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), xrdtest_core::error::XrdtestError> {
//! use xrdtest_core::config::XrdtestConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = XrdtestConfig::load("xrdtest.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = XrdtestConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, XrdtestError};

/// 설정 상한값 상수
const MAX_CONNECT_TIMEOUT_SECS: u64 = 600;
const MAX_CONNECT_RETRY_ATTEMPTS: u32 = 20;
const MAX_BACKOFF_MS: u64 = 60_000;
const MAX_READINESS_TIMEOUT_SECS: u64 = 3600;
const MAX_CLIENT_TIMEOUT_SECS: u64 = 24 * 3600;
const MAX_STOP_GRACE_SECS: u64 = 300;

/// xrdtest 통합 설정
///
/// `xrdtest.toml` 파일의 최상위 구조를 나타냅니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct XrdtestConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 시나리오 러너 설정
    #[serde(default)]
    pub runner: RunnerSection,
}

impl XrdtestConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, XrdtestError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// 설정 파일이 없으면 기본값에 환경변수 오버라이드만 적용합니다.
    ///
    /// CLI가 기본 경로를 사용할 때 호출합니다. 파일이 존재하지만
    /// 파싱에 실패하면 에러를 그대로 반환합니다.
    pub async fn load_or_default(path: impl AsRef<Path>) -> Result<Self, XrdtestError> {
        match Self::load(&path).await {
            Err(XrdtestError::Config(ConfigError::FileNotFound { path })) => {
                tracing::debug!(path = %path, "config file not found, using defaults");
                let mut config = Self::default();
                config.apply_env_overrides();
                config.validate()?;
                Ok(config)
            }
            other => other,
        }
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, XrdtestError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                XrdtestError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                XrdtestError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, XrdtestError> {
        toml::from_str(toml_str).map_err(|e| {
            XrdtestError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `XRDTEST_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "XRDTEST_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "XRDTEST_GENERAL_LOG_FORMAT");

        // Runner
        override_u64(
            &mut self.runner.connect_timeout_secs,
            "XRDTEST_RUNNER_CONNECT_TIMEOUT_SECS",
        );
        override_u32(
            &mut self.runner.connect_retry_attempts,
            "XRDTEST_RUNNER_CONNECT_RETRY_ATTEMPTS",
        );
        override_u64(
            &mut self.runner.connect_backoff_base_ms,
            "XRDTEST_RUNNER_CONNECT_BACKOFF_BASE_MS",
        );
        override_u64(
            &mut self.runner.connect_backoff_max_ms,
            "XRDTEST_RUNNER_CONNECT_BACKOFF_MAX_MS",
        );
        override_u64(
            &mut self.runner.readiness_timeout_secs,
            "XRDTEST_RUNNER_READINESS_TIMEOUT_SECS",
        );
        override_u64(
            &mut self.runner.readiness_poll_interval_ms,
            "XRDTEST_RUNNER_READINESS_POLL_INTERVAL_MS",
        );
        override_u64(
            &mut self.runner.client_timeout_secs,
            "XRDTEST_RUNNER_CLIENT_TIMEOUT_SECS",
        );
        override_u64(
            &mut self.runner.stop_grace_secs,
            "XRDTEST_RUNNER_STOP_GRACE_SECS",
        );
        override_string(&mut self.runner.cleanup_image, "XRDTEST_RUNNER_CLEANUP_IMAGE");
        override_string(&mut self.runner.name_prefix, "XRDTEST_RUNNER_NAME_PREFIX");
        override_string(&mut self.runner.ssh_binary, "XRDTEST_RUNNER_SSH_BINARY");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), XrdtestError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        let runner = &self.runner;
        if runner.connect_timeout_secs == 0 || runner.connect_timeout_secs > MAX_CONNECT_TIMEOUT_SECS
        {
            return Err(invalid(
                "runner.connect_timeout_secs",
                format!("must be 1-{MAX_CONNECT_TIMEOUT_SECS}"),
            ));
        }

        if runner.connect_retry_attempts == 0
            || runner.connect_retry_attempts > MAX_CONNECT_RETRY_ATTEMPTS
        {
            return Err(invalid(
                "runner.connect_retry_attempts",
                format!("must be 1-{MAX_CONNECT_RETRY_ATTEMPTS}"),
            ));
        }

        if runner.connect_backoff_base_ms > MAX_BACKOFF_MS
            || runner.connect_backoff_max_ms > MAX_BACKOFF_MS
        {
            return Err(invalid(
                "runner.connect_backoff_base_ms",
                format!("backoff values must be 0-{MAX_BACKOFF_MS}"),
            ));
        }

        if runner.connect_backoff_max_ms < runner.connect_backoff_base_ms {
            return Err(invalid(
                "runner.connect_backoff_max_ms",
                "must not be smaller than connect_backoff_base_ms",
            ));
        }

        if runner.readiness_timeout_secs == 0
            || runner.readiness_timeout_secs > MAX_READINESS_TIMEOUT_SECS
        {
            return Err(invalid(
                "runner.readiness_timeout_secs",
                format!("must be 1-{MAX_READINESS_TIMEOUT_SECS}"),
            ));
        }

        if runner.readiness_poll_interval_ms == 0 {
            return Err(invalid(
                "runner.readiness_poll_interval_ms",
                "must be greater than 0",
            ));
        }

        if runner.client_timeout_secs == 0 || runner.client_timeout_secs > MAX_CLIENT_TIMEOUT_SECS {
            return Err(invalid(
                "runner.client_timeout_secs",
                format!("must be 1-{MAX_CLIENT_TIMEOUT_SECS}"),
            ));
        }

        if runner.stop_grace_secs > MAX_STOP_GRACE_SECS {
            return Err(invalid(
                "runner.stop_grace_secs",
                format!("must be 0-{MAX_STOP_GRACE_SECS}"),
            ));
        }

        if runner.cleanup_image.is_empty() {
            return Err(invalid("runner.cleanup_image", "must not be empty"));
        }

        if runner.name_prefix.is_empty()
            || !runner
                .name_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(invalid(
                "runner.name_prefix",
                "must be non-empty and contain only [A-Za-z0-9_-]",
            ));
        }

        if runner.ssh_binary.is_empty() {
            return Err(invalid("runner.ssh_binary", "must not be empty"));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> XrdtestError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.into(),
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "pretty".to_owned(),
        }
    }
}

/// 시나리오 러너 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSection {
    /// 연결 시도 1회당 타임아웃 (초)
    pub connect_timeout_secs: u64,
    /// 연결 시도 최대 횟수
    pub connect_retry_attempts: u32,
    /// 연결 재시도 백오프 기본 간격 (밀리초)
    pub connect_backoff_base_ms: u64,
    /// 연결 재시도 백오프 상한 (밀리초)
    pub connect_backoff_max_ms: u64,
    /// 포트 준비 대기 타임아웃 (초)
    pub readiness_timeout_secs: u64,
    /// 포트 준비 확인 주기 (밀리초)
    pub readiness_poll_interval_ms: u64,
    /// 테스트 클라이언트 실행 타임아웃 (초)
    pub client_timeout_secs: u64,
    /// 컨테이너 정지 유예 시간 (초)
    pub stop_grace_secs: u64,
    /// 아티팩트 삭제용 이미지
    pub cleanup_image: String,
    /// 컨테이너 이름 접두어
    pub name_prefix: String,
    /// 원격 연결에 사용할 ssh 실행 파일
    pub ssh_binary: String,
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            connect_retry_attempts: 4,
            connect_backoff_base_ms: 500,
            connect_backoff_max_ms: 8_000,
            readiness_timeout_secs: 30,
            readiness_poll_interval_ms: 1_000,
            client_timeout_secs: 1_800,
            stop_grace_secs: 10,
            cleanup_image: "busybox".to_owned(),
            name_prefix: "xrootd".to_owned(),
            ssh_binary: "ssh".to_owned(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_u32(target: &mut u32, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u32>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u32 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}
