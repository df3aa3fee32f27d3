//! 러너 설정
//!
//! [`RunnerConfig`]는 core의 [`RunnerSection`](xrdtest_core::config::RunnerSection)을
//! 기반으로, 실행마다 CLI에서 주는 오버라이드(이미지 버전, 반복 횟수,
//! 추가 환경변수 등)를 더한 설정입니다.
//!
//! # 사용 예시
//! ```ignore
//! use xrdtest_core::config::XrdtestConfig;
//! use xrdtest_orchestrator::config::RunnerConfigBuilder;
//!
//! let core_config = XrdtestConfig::default();
//! let config = RunnerConfigBuilder::from_core(&core_config.runner)
//!     .server_version("gridppedi/xrdtesting:xrd-v5.7.0")
//!     .repeat(3)
//!     .build()?;
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use xrdtest_core::config::RunnerSection;
use xrdtest_core::error::{ConfigError, XrdtestError};

/// 실행 단위 상한값 상수
const MAX_REPEAT: u32 = 1000;
const MAX_SLEEP_AFTER_SERVERS: Duration = Duration::from_secs(3600);

/// 시나리오 러너 설정
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// 연결 시도 1회 제한 시간
    pub connect_timeout: Duration,
    pub connect_retry_attempts: u32,
    pub connect_backoff_base: Duration,
    pub connect_backoff_max: Duration,
    /// 준비 상태 대기 제한
    pub readiness_timeout: Duration,
    pub readiness_poll_interval: Duration,
    /// 테스트 클라이언트 실행 제한
    pub client_timeout: Duration,
    /// stop 시 SIGKILL 전 대기 시간
    pub stop_grace: Duration,
    /// 아티팩트 삭제용 헬퍼 이미지
    pub cleanup_image: String,
    /// 컨테이너 이름 접두어
    pub name_prefix: String,
    pub ssh_binary: String,

    // --- 실행 단위 오버라이드 ---
    /// 시나리오 기본 이미지 대체
    pub container_version: Option<String>,
    /// 모든 서버 역할의 이미지 대체
    pub server_version: Option<String>,
    /// 테스트 클라이언트 이미지 대체
    pub test_version: Option<String>,
    /// 시나리오 반복 횟수
    pub repeat: u32,
    /// 서버 프로비저닝과 클라이언트 실행 사이의 대기
    pub sleep_after_servers: Duration,
    /// 클라이언트 환경에 덧붙일 변수 (시나리오 값보다 우선)
    pub extra_env: BTreeMap<String, String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::from_core(&RunnerSection::default())
    }
}

impl RunnerConfig {
    /// core의 `RunnerSection`에서 러너 설정을 생성합니다.
    ///
    /// 실행 단위 오버라이드는 비어 있는 상태로 시작합니다.
    pub fn from_core(core: &RunnerSection) -> Self {
        Self {
            connect_timeout: Duration::from_secs(core.connect_timeout_secs),
            connect_retry_attempts: core.connect_retry_attempts,
            connect_backoff_base: Duration::from_millis(core.connect_backoff_base_ms),
            connect_backoff_max: Duration::from_millis(core.connect_backoff_max_ms),
            readiness_timeout: Duration::from_secs(core.readiness_timeout_secs),
            readiness_poll_interval: Duration::from_millis(core.readiness_poll_interval_ms),
            client_timeout: Duration::from_secs(core.client_timeout_secs),
            stop_grace: Duration::from_secs(core.stop_grace_secs),
            cleanup_image: core.cleanup_image.clone(),
            name_prefix: core.name_prefix.clone(),
            ssh_binary: core.ssh_binary.clone(),
            container_version: None,
            server_version: None,
            test_version: None,
            repeat: 1,
            sleep_after_servers: Duration::ZERO,
            extra_env: BTreeMap::new(),
        }
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), XrdtestError> {
        if self.repeat == 0 || self.repeat > MAX_REPEAT {
            return Err(invalid("repeat", format!("must be 1-{MAX_REPEAT}")));
        }

        if self.sleep_after_servers > MAX_SLEEP_AFTER_SERVERS {
            return Err(invalid(
                "sleep_after_servers",
                format!("must be at most {}s", MAX_SLEEP_AFTER_SERVERS.as_secs()),
            ));
        }

        if self.client_timeout.is_zero() {
            return Err(invalid("client_timeout", "must be greater than 0"));
        }

        for (field, value) in [
            ("container_version", &self.container_version),
            ("server_version", &self.server_version),
            ("test_version", &self.test_version),
        ] {
            if value.as_deref().is_some_and(str::is_empty) {
                return Err(invalid(field, "image reference must not be empty"));
            }
        }

        if let Some(key) = self.extra_env.keys().find(|k| k.is_empty() || k.contains('=')) {
            return Err(invalid(
                "extra_env",
                format!("invalid environment variable name '{key}'"),
            ));
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

/// 러너 설정 빌더
#[derive(Default)]
pub struct RunnerConfigBuilder {
    config: RunnerConfig,
}

impl RunnerConfigBuilder {
    /// 기본값으로 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// core 설정에서 시작하는 빌더를 생성합니다.
    pub fn from_core(core: &RunnerSection) -> Self {
        Self {
            config: RunnerConfig::from_core(core),
        }
    }

    pub fn container_version(mut self, image: impl Into<String>) -> Self {
        self.config.container_version = Some(image.into());
        self
    }

    pub fn server_version(mut self, image: impl Into<String>) -> Self {
        self.config.server_version = Some(image.into());
        self
    }

    pub fn test_version(mut self, image: impl Into<String>) -> Self {
        self.config.test_version = Some(image.into());
        self
    }

    pub fn repeat(mut self, repeat: u32) -> Self {
        self.config.repeat = repeat;
        self
    }

    pub fn sleep_after_servers(mut self, sleep: Duration) -> Self {
        self.config.sleep_after_servers = sleep;
        self
    }

    pub fn client_timeout(mut self, timeout: Duration) -> Self {
        self.config.client_timeout = timeout;
        self
    }

    /// 클라이언트 환경변수 하나를 추가합니다. 같은 키는 나중 값이 이깁니다.
    pub fn extra_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.extra_env.insert(key.into(), value.into());
        self
    }

    /// 연결 재시도 정책을 설정합니다.
    pub fn connect_retry(mut self, attempts: u32, base: Duration, max: Duration) -> Self {
        self.config.connect_retry_attempts = attempts;
        self.config.connect_backoff_base = base;
        self.config.connect_backoff_max = max;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// 준비 상태 대기 제한과 폴링 간격을 설정합니다.
    pub fn readiness(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.config.readiness_timeout = timeout;
        self.config.readiness_poll_interval = poll_interval;
        self
    }

    pub fn cleanup_image(mut self, image: impl Into<String>) -> Self {
        self.config.cleanup_image = image.into();
        self
    }

    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.name_prefix = prefix.into();
        self
    }

    /// 설정을 검증하고 반환합니다.
    pub fn build(self) -> Result<RunnerConfig, XrdtestError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_core_converts_units() {
        let core = RunnerSection {
            connect_backoff_base_ms: 250,
            client_timeout_secs: 90,
            ..RunnerSection::default()
        };
        let config = RunnerConfig::from_core(&core);
        assert_eq!(config.connect_backoff_base, Duration::from_millis(250));
        assert_eq!(config.client_timeout, Duration::from_secs(90));
        assert_eq!(config.repeat, 1);
        assert!(config.extra_env.is_empty());
    }

    #[test]
    fn default_config_is_valid() {
        assert!(RunnerConfig::default().validate().is_ok());
    }

    #[test]
    fn builder_applies_overrides() {
        let config = RunnerConfigBuilder::new()
            .server_version("img:server")
            .test_version("img:client")
            .repeat(3)
            .extra_env("TOKEN", "a")
            .extra_env("TOKEN", "b")
            .build()
            .unwrap();
        assert_eq!(config.server_version.as_deref(), Some("img:server"));
        assert_eq!(config.test_version.as_deref(), Some("img:client"));
        assert_eq!(config.repeat, 3);
        assert_eq!(config.extra_env.get("TOKEN").map(String::as_str), Some("b"));
    }

    #[test]
    fn rejects_zero_repeat() {
        let err = RunnerConfigBuilder::new().repeat(0).build().unwrap_err();
        assert!(err.to_string().contains("repeat"));
    }

    #[test]
    fn rejects_empty_image_override() {
        let err = RunnerConfigBuilder::new()
            .server_version("")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("server_version"));
    }

    #[test]
    fn rejects_bad_env_name() {
        let err = RunnerConfigBuilder::new()
            .extra_env("A=B", "c")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("extra_env"));
    }

    #[test]
    fn rejects_zero_client_timeout() {
        let err = RunnerConfigBuilder::new()
            .client_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("client_timeout"));
    }
}
