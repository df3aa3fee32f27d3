//! 오케스트레이터 에러 타입
//!
//! 단계별로 에러 타입이 분리되어 있습니다.
//! - [`RuntimeError`]: 런타임 API 호출 하나의 실패
//! - [`ConnectionError`]: 엔드포인트 연결 수립 실패
//! - [`ProvisionError`]: 역할 하나의 프로비저닝 실패
//! - [`CleanupError`]: 정리 단계 실패 (관찰용, 상위로 전파되지 않음)
//!
//! `From<…> for XrdtestError` 변환이 구현되어 있어 CLI 레이어에서
//! `?` 연산자로 전파할 수 있습니다.

use std::fmt;

use serde::Serialize;
use xrdtest_core::error::XrdtestError;

/// 런타임 API 호출 에러
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    /// 런타임 API 호출 실패
    #[error("runtime api error: {0}")]
    Api(String),

    /// 런타임 소켓 연결 실패
    #[error("runtime connection error: {0}")]
    Connection(String),

    /// 컨테이너를 찾을 수 없음 (404)
    #[error("container not found: {0}")]
    NotFound(String),

    /// 이미지가 로컬에 없음 (create 시 404)
    #[error("image not found: {0}")]
    ImageNotFound(String),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// 연결 실패 분류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionErrorKind {
    /// 소켓/호스트에 도달할 수 없음
    Unreachable,
    /// ssh 인증 실패 (재시도하지 않음)
    AuthFailed,
    /// 시도 제한 시간 초과
    Timeout,
}

impl fmt::Display for ConnectionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable => write!(f, "unreachable"),
            Self::AuthFailed => write!(f, "authentication failed"),
            Self::Timeout => write!(f, "timed out"),
        }
    }
}

/// 엔드포인트 연결 에러
#[derive(Debug, Clone, thiserror::Error)]
#[error("connection to {endpoint} {kind}: {reason}")]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    /// 엔드포인트 URI
    pub endpoint: String,
    pub reason: String,
}

impl ConnectionError {
    pub fn new(
        kind: ConnectionErrorKind,
        endpoint: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            endpoint: endpoint.to_string(),
            reason: reason.into(),
        }
    }

    /// 재시도해도 결과가 바뀌지 않는 에러인지 여부
    pub fn is_permanent(&self) -> bool {
        self.kind == ConnectionErrorKind::AuthFailed
    }
}

/// 프로비저닝 실패 분류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionErrorKind {
    CreateFailed,
    StartFailed,
    ReadinessTimeout,
}

impl fmt::Display for ProvisionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateFailed => write!(f, "create failed"),
            Self::StartFailed => write!(f, "start failed"),
            Self::ReadinessTimeout => write!(f, "readiness timeout"),
        }
    }
}

/// 역할 프로비저닝 에러
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind} for role '{role}': {reason}")]
pub struct ProvisionError {
    pub kind: ProvisionErrorKind,
    /// 실패한 역할 레이블
    pub role: String,
    pub reason: String,
}

impl ProvisionError {
    pub fn new(kind: ProvisionErrorKind, role: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            kind,
            role: role.into(),
            reason: reason.to_string(),
        }
    }
}

/// 정리 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStep {
    ArtifactRemove,
    LogCapture,
    ContainerStop,
    ContainerRemove,
    ConnectionRelease,
}

impl CleanupStep {
    /// 메트릭 레이블 값
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ArtifactRemove => "artifact_remove",
            Self::LogCapture => "log_capture",
            Self::ContainerStop => "container_stop",
            Self::ContainerRemove => "container_remove",
            Self::ConnectionRelease => "connection_release",
        }
    }
}

impl fmt::Display for CleanupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 정리 단계 에러. 보고서에 수집될 뿐 실행 결과를 바꾸지 않습니다.
#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[error("cleanup {step} failed for '{target}': {reason}")]
pub struct CleanupError {
    pub step: CleanupStep,
    /// 대상 (경로, 컨테이너 이름, 엔드포인트)
    pub target: String,
    pub reason: String,
}

impl CleanupError {
    pub fn new(step: CleanupStep, target: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            step,
            target: target.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<RuntimeError> for XrdtestError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Connection(msg) => XrdtestError::Connection(msg),
            other => XrdtestError::Runtime(other.to_string()),
        }
    }
}

impl From<ConnectionError> for XrdtestError {
    fn from(err: ConnectionError) -> Self {
        XrdtestError::Connection(err.to_string())
    }
}

impl From<ProvisionError> for XrdtestError {
    fn from(err: ProvisionError) -> Self {
        XrdtestError::Provision(err.to_string())
    }
}
