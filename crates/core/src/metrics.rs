//! 메트릭 상수
//!
//! 오케스트레이터가 `metrics::counter!()`, `metrics::histogram!()` 매크로에
//! 넘기는 이름을 한곳에서 정의합니다. 레코더가 설치되지 않으면 기록은 무시됩니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `xrdtest_`
//! - 접미어: `_total` (counter), `_seconds` (histogram)

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 실행 결과 레이블 키 (success, provision_failure, client_failure, cancelled)
pub const LABEL_OUTCOME: &str = "outcome";

/// 정리 단계 레이블 키 (artifact_remove, container_stop, ...)
pub const LABEL_STEP: &str = "step";

/// 연결 종류 레이블 키 (local, remote)
pub const LABEL_TRANSPORT: &str = "transport";

// ─── 오케스트레이터 메트릭 ─────────────────────────────────────────

/// 완료된 시나리오 실행 수 (counter, label: outcome)
pub const RUNS_TOTAL: &str = "xrdtest_runs_total";

/// 시나리오 실행 시간 (histogram, 초)
pub const RUN_DURATION_SECONDS: &str = "xrdtest_run_duration_seconds";

/// 새로 수립된 런타임 연결 수 (counter, label: transport)
pub const CONNECTIONS_ESTABLISHED_TOTAL: &str = "xrdtest_connections_established_total";

/// 연결 재시도 수 (counter)
pub const CONNECTION_RETRIES_TOTAL: &str = "xrdtest_connection_retries_total";

/// 프로비저닝된 서버 컨테이너 수 (counter)
pub const CONTAINERS_PROVISIONED_TOTAL: &str = "xrdtest_containers_provisioned_total";

/// 프로비저닝 실패 수 (counter)
pub const PROVISION_FAILURES_TOTAL: &str = "xrdtest_provision_failures_total";

/// 정리 단계 실패 수 (counter, label: step)
pub const CLEANUP_ERRORS_TOTAL: &str = "xrdtest_cleanup_errors_total";
