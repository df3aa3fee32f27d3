//! xrdtest 공통 크레이트
//!
//! 시나리오 디스크립터 모델, 에러 타입, 러너 설정, 메트릭 이름을 제공합니다.
//! 오케스트레이터와 CLI는 이 크레이트의 타입만 공유합니다.

pub mod config;
pub mod descriptor;
pub mod error;
pub mod metrics;

// --- 주요 타입 re-export ---

// 에러
pub use error::{ConfigError, DescriptorError, DescriptorErrorKind, XrdtestError};

// 설정
pub use config::XrdtestConfig;

// 디스크립터
pub use descriptor::{
    ClientSpec, ConnectionEndpoint, Mount, MountMode, Provisioning, RoleKind, ScenarioDescriptor,
    ServerRole,
};
