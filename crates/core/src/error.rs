//! 에러 타입: 도메인별 에러 정의

use std::fmt;

/// xrdtest 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum XrdtestError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 시나리오 디스크립터 에러
    #[error("descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),

    /// 런타임 연결 에러
    #[error("connection error: {0}")]
    Connection(String),

    /// 컨테이너 프로비저닝 에러
    #[error("provision error: {0}")]
    Provision(String),

    /// 컨테이너 런타임 API 에러
    #[error("runtime error: {0}")]
    Runtime(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 디스크립터 에러 분류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorErrorKind {
    /// JSON 구문 오류 또는 잘못된 값 형식
    Malformed,
    /// 필수 필드 누락
    MissingField,
    /// 마운트 항목 오류 (mode, bind)
    InvalidMount,
}

impl fmt::Display for DescriptorErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed"),
            Self::MissingField => write!(f, "missing field"),
            Self::InvalidMount => write!(f, "invalid mount"),
        }
    }
}

/// 시나리오 디스크립터 로딩/검증 에러
///
/// 항상 문제가 된 필드 경로(예: `servers[1].uri`)를 포함합니다.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind} at '{field}': {reason}")]
pub struct DescriptorError {
    /// 에러 분류
    pub kind: DescriptorErrorKind,
    /// 문제가 된 필드 경로
    pub field: String,
    /// 상세 사유
    pub reason: String,
}

impl DescriptorError {
    pub fn malformed(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind: DescriptorErrorKind::Malformed,
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn missing(field: impl Into<String>) -> Self {
        Self {
            kind: DescriptorErrorKind::MissingField,
            field: field.into(),
            reason: "required field is missing".to_owned(),
        }
    }

    pub fn invalid_mount(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind: DescriptorErrorKind::InvalidMount,
            field: field.into(),
            reason: reason.into(),
        }
    }
}
