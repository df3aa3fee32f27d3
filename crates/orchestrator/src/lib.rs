//! xrdtest 오케스트레이션 엔진
//!
//! 시나리오 디스크립터를 받아 여러 호스트의 컨테이너 런타임에 서버 역할을
//! 선언 순서대로 띄우고, 테스트 클라이언트를 한 번 실행한 뒤, 어떤 경로로
//! 끝나든 만든 자원을 모두 정리합니다.
//!
//! # 구성
//! - [`runtime`]: 런타임 API trait과 bollard 구현
//! - [`transport`]: 원격 소켓 ssh 포워딩
//! - [`connection`]: 엔드포인트별 연결 공유, 재시도
//! - [`provision`]: 역할 프로비저닝, 준비 상태 확인
//! - [`runner`]: 시나리오 실행, 결과 분류
//! - [`cleanup`]: 아티팩트 삭제, 컨테이너 정리, 연결 해제
//!
//! # 사용 예시
//! ```ignore
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use xrdtest_orchestrator::{BollardConnector, RunnerConfig, ScenarioRunner};
//!
//! let config = Arc::new(RunnerConfig::default());
//! let runner = ScenarioRunner::new(Arc::new(BollardConnector::new(&config)), config);
//! let report = runner.run(&descriptor, CancellationToken::new()).await;
//! ```

pub mod cleanup;
pub mod config;
pub mod connection;
pub mod error;
pub mod provision;
pub mod runner;
pub mod runtime;
pub mod speed;
pub mod teardown;
pub mod transport;

pub use cleanup::{CleanupReport, ContainerLog, finalize};
pub use config::{RunnerConfig, RunnerConfigBuilder};
pub use connection::{
    BollardConnector, Connection, ConnectionManager, Connector, Established, RetryPolicy,
};
pub use error::{
    CleanupError, CleanupStep, ConnectionError, ConnectionErrorKind, ProvisionError,
    ProvisionErrorKind, RuntimeError,
};
pub use provision::{ProvisionHalt, ProvisionedContainer, RoleProvisioner};
pub use runner::{FailureCause, RunOutcome, RunReport, RunResult, RunState, ScenarioRunner};
pub use runtime::{BollardRuntime, ContainerRuntime, ContainerSpec};
pub use speed::extract_transfer_speed;
pub use teardown::{TeardownSet, TrackedContainer};
