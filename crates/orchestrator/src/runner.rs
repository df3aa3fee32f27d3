//! 시나리오 러너: 역할 프로비저닝, 클라이언트 실행, 결과 분류
//!
//! [`ScenarioRunner::run`]은 실패 지점이나 취소 여부와 관계없이 항상
//! [`cleanup::finalize`]를 정확히 한 번 거친 뒤 [`RunReport`]를 반환합니다.

use std::sync::Arc;
use std::time::SystemTime;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use xrdtest_core::metrics as m;
use xrdtest_core::{ConnectionEndpoint, ScenarioDescriptor};

use crate::cleanup::{self, CleanupReport};
use crate::config::RunnerConfig;
use crate::connection::{ConnectionManager, Connector, RetryPolicy};
use crate::error::{ConnectionError, ConnectionErrorKind, ProvisionError, ProvisionErrorKind};
use crate::provision::{
    CLIENT_ROLE, ProvisionHalt, ProvisionedContainer, RoleProvisioner, client_container_name,
    create_with_pull, remove_stale, resolve_client_image, role_label, until_cancelled,
};
use crate::runtime::ContainerSpec;
use crate::speed::extract_transfer_speed;
use crate::teardown::{TeardownSet, TrackedContainer};

/// 실행 결과 분류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    ProvisionFailure,
    ClientFailure,
    Cancelled,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::ProvisionFailure => "provision_failure",
            Self::ClientFailure => "client_failure",
            Self::Cancelled => "cancelled",
        }
    }
}

/// 실패 원인
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureCause {
    /// 런타임 연결 실패
    Connection {
        kind: ConnectionErrorKind,
        endpoint: String,
        reason: String,
    },
    /// 컨테이너 생성/시작/준비 실패
    Provision {
        kind: ProvisionErrorKind,
        reason: String,
    },
    /// 클라이언트가 0이 아닌 코드로 종료
    ClientExit { code: i64 },
    /// 클라이언트 실행 제한 시간 초과
    ClientTimeout { after_secs: u64 },
    /// 클라이언트 대기 중 런타임 에러
    ClientRuntime { reason: String },
    Cancelled,
}

/// 실행 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub outcome: RunOutcome,
    pub client_exit_code: Option<i64>,
    pub failing_role: Option<String>,
    pub cause: Option<FailureCause>,
}

impl RunResult {
    fn success() -> Self {
        Self {
            outcome: RunOutcome::Success,
            client_exit_code: Some(0),
            failing_role: None,
            cause: None,
        }
    }

    fn cancelled() -> Self {
        Self {
            outcome: RunOutcome::Cancelled,
            client_exit_code: None,
            failing_role: None,
            cause: Some(FailureCause::Cancelled),
        }
    }

    fn connection_failure(role: impl Into<String>, err: ConnectionError) -> Self {
        Self {
            outcome: RunOutcome::ProvisionFailure,
            client_exit_code: None,
            failing_role: Some(role.into()),
            cause: Some(FailureCause::Connection {
                kind: err.kind,
                endpoint: err.endpoint,
                reason: err.reason,
            }),
        }
    }

    fn provision_failure(err: ProvisionError) -> Self {
        Self {
            outcome: RunOutcome::ProvisionFailure,
            client_exit_code: None,
            failing_role: Some(err.role),
            cause: Some(FailureCause::Provision {
                kind: err.kind,
                reason: err.reason,
            }),
        }
    }

    fn client_failure(code: Option<i64>, cause: FailureCause) -> Self {
        Self {
            outcome: RunOutcome::ClientFailure,
            client_exit_code: code,
            failing_role: None,
            cause: Some(cause),
        }
    }

    /// 연결 실패로 프로비저닝이 중단되었는지 여부
    pub fn is_connection_failure(&self) -> bool {
        matches!(self.cause, Some(FailureCause::Connection { .. }))
    }
}

/// 실행 하나의 전체 보고서
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub scenario: String,
    pub result: RunResult,
    pub provisioned: Vec<ProvisionedContainer>,
    pub client_output: Option<String>,
    /// 클라이언트 출력에서 추출한 전송 속도 (MB/s)
    pub transfer_speed_mbps: Option<f64>,
    pub started_at: SystemTime,
    pub duration_secs: f64,
    pub cleanup: CleanupReport,
}

/// 시작된 테스트 클라이언트 정보 (아티팩트 삭제에 사용)
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub endpoint: ConnectionEndpoint,
    pub binds: Vec<String>,
    pub artifact_paths: Vec<String>,
    pub started: bool,
}

/// 실행 하나가 소유하는 상태. 정리 단계에서 소비됩니다.
pub struct RunState<C: Connector> {
    pub run_id: String,
    pub connections: ConnectionManager<C>,
    pub teardown: TeardownSet,
    pub client: Option<ClientHandle>,
}

impl<C: Connector> RunState<C> {
    pub fn new(run_id: impl Into<String>, connections: ConnectionManager<C>) -> Self {
        Self {
            run_id: run_id.into(),
            connections,
            teardown: TeardownSet::new(),
            client: None,
        }
    }
}

/// 실행 중 모은 부가 정보
#[derive(Default)]
struct Capture {
    provisioned: Vec<ProvisionedContainer>,
    client_output: Option<String>,
}

/// 시나리오 러너
pub struct ScenarioRunner<C: Connector> {
    connector: Arc<C>,
    config: Arc<RunnerConfig>,
    provisioner: RoleProvisioner,
}

impl<C: Connector> ScenarioRunner<C> {
    pub fn new(connector: Arc<C>, config: Arc<RunnerConfig>) -> Self {
        Self {
            connector,
            provisioner: RoleProvisioner::new(Arc::clone(&config)),
            config,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// 시나리오를 한 번 실행합니다.
    ///
    /// `cancel`이 취소되면 대기 중인 단계를 버리고 정리로 넘어갑니다.
    /// 진행 중인 create는 끝까지 기다려 teardown 목록에 등록한 뒤 멈춥니다.
    pub async fn run(&self, descriptor: &ScenarioDescriptor, cancel: CancellationToken) -> RunReport {
        let run_id = new_run_id();
        let started_at = SystemTime::now();
        let clock = tokio::time::Instant::now();

        info!(
            run_id = %run_id,
            scenario = %descriptor.name,
            roles = descriptor.servers.len(),
            "starting scenario run"
        );

        let connections =
            ConnectionManager::new(Arc::clone(&self.connector), RetryPolicy::from_config(&self.config));
        let mut state = RunState::new(run_id.clone(), connections);
        let mut capture = Capture::default();

        let result = self
            .execute(descriptor, &mut state, &mut capture, &cancel)
            .await;
        if result.outcome == RunOutcome::Cancelled {
            warn!(run_id = %run_id, "run cancelled");
        }

        let cleanup = cleanup::finalize(state, &self.config).await;

        let duration = clock.elapsed();
        metrics::counter!(m::RUNS_TOTAL, m::LABEL_OUTCOME => result.outcome.as_str()).increment(1);
        metrics::histogram!(m::RUN_DURATION_SECONDS).record(duration.as_secs_f64());

        info!(
            run_id = %run_id,
            scenario = %descriptor.name,
            outcome = result.outcome.as_str(),
            exit_code = ?result.client_exit_code,
            duration_ms = duration.as_millis() as u64,
            "scenario run finished"
        );

        let transfer_speed_mbps = capture
            .client_output
            .as_deref()
            .and_then(extract_transfer_speed);

        RunReport {
            run_id,
            scenario: descriptor.name.clone(),
            result,
            provisioned: capture.provisioned,
            client_output: capture.client_output,
            transfer_speed_mbps,
            started_at,
            duration_secs: duration.as_secs_f64(),
            cleanup,
        }
    }

    async fn execute(
        &self,
        descriptor: &ScenarioDescriptor,
        state: &mut RunState<C>,
        capture: &mut Capture,
        cancel: &CancellationToken,
    ) -> RunResult {
        for (index, role) in descriptor.servers.iter().enumerate() {
            let label = role_label(index, role);
            if role.is_reference_only() {
                debug!(role = %label, "reference-only role, skipping");
                continue;
            }

            let conn = match until_cancelled(cancel, state.connections.acquire(&role.endpoint)).await {
                None => return RunResult::cancelled(),
                Some(Ok(conn)) => conn,
                Some(Err(e)) => return RunResult::connection_failure(label, e),
            };

            match self
                .provisioner
                .provision(index, role, descriptor, &conn, &mut state.teardown, cancel)
                .await
            {
                Ok(container) => capture.provisioned.push(container),
                Err(ProvisionHalt::Failed(e)) => return RunResult::provision_failure(e),
                Err(ProvisionHalt::Cancelled) => return RunResult::cancelled(),
            }
        }

        if !self.config.sleep_after_servers.is_zero() {
            info!(
                secs = self.config.sleep_after_servers.as_secs(),
                "pausing before test client"
            );
            let pause = tokio::time::sleep(self.config.sleep_after_servers);
            if until_cancelled(cancel, pause).await.is_none() {
                return RunResult::cancelled();
            }
        }

        self.run_client(descriptor, state, capture, cancel).await
    }

    async fn run_client(
        &self,
        descriptor: &ScenarioDescriptor,
        state: &mut RunState<C>,
        capture: &mut Capture,
        cancel: &CancellationToken,
    ) -> RunResult {
        let client = &descriptor.client;
        let conn = match until_cancelled(cancel, state.connections.acquire(&client.endpoint)).await {
            None => return RunResult::cancelled(),
            Some(Ok(conn)) => conn,
            Some(Err(e)) => return RunResult::connection_failure(CLIENT_ROLE, e),
        };

        let image = resolve_client_image(&self.config, descriptor);
        let name = client_container_name(&self.config.name_prefix, &image, &state.run_id);
        if until_cancelled(cancel, remove_stale(&conn, &name)).await.is_none() {
            return RunResult::cancelled();
        }

        let mut environment = client.environment.clone();
        environment.extend(self.config.extra_env.clone());
        let binds: Vec<String> = client.mounts.iter().map(|m| m.bind_spec()).collect();

        let spec = ContainerSpec {
            name: name.clone(),
            image: image.clone(),
            entrypoint: Vec::new(),
            command: client.command.clone(),
            environment,
            binds: binds.clone(),
            host_network: true,
            tty: true,
        };

        info!(container = %name, image = %image, command = ?client.command, "creating test client");
        let id = match create_with_pull(&conn, &spec).await {
            Ok(id) => id,
            Err(e) => {
                return RunResult::provision_failure(ProvisionError::new(
                    ProvisionErrorKind::CreateFailed,
                    CLIENT_ROLE,
                    e,
                ));
            }
        };

        state.teardown.register(TrackedContainer {
            role: CLIENT_ROLE.to_owned(),
            name: name.clone(),
            id: id.clone(),
            endpoint: client.endpoint.clone(),
            is_client: true,
        });
        if cancel.is_cancelled() {
            return RunResult::cancelled();
        }

        if let Err(e) = conn.start_container(&id).await {
            return RunResult::provision_failure(ProvisionError::new(
                ProvisionErrorKind::StartFailed,
                CLIENT_ROLE,
                e,
            ));
        }

        state.client = Some(ClientHandle {
            endpoint: client.endpoint.clone(),
            binds,
            artifact_paths: client.artifact_paths.clone(),
            started: true,
        });

        let timeout = self.config.client_timeout;
        let waited = tokio::time::timeout(timeout, conn.wait_container(&id));
        let Some(waited) = until_cancelled(cancel, waited).await else {
            return RunResult::cancelled();
        };

        match conn.container_logs(&id).await {
            Ok(output) => capture.client_output = Some(output),
            Err(e) => warn!(container = %name, error = %e, "failed to read client output"),
        }

        match waited {
            Ok(Ok(0)) => {
                info!(container = %name, "test client succeeded");
                RunResult::success()
            }
            Ok(Ok(code)) => {
                warn!(container = %name, code, "test client failed");
                RunResult::client_failure(Some(code), FailureCause::ClientExit { code })
            }
            Ok(Err(e)) => {
                warn!(container = %name, error = %e, "waiting for test client failed");
                RunResult::client_failure(
                    None,
                    FailureCause::ClientRuntime {
                        reason: e.to_string(),
                    },
                )
            }
            Err(_) => {
                warn!(container = %name, secs = timeout.as_secs(), "test client timed out");
                RunResult::client_failure(
                    None,
                    FailureCause::ClientTimeout {
                        after_secs: timeout.as_secs(),
                    },
                )
            }
        }
    }
}

/// 컨테이너 이름에 넣기 좋은 짧은 실행 ID
fn new_run_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(12);
    id
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::connection::Established;
    use crate::runtime::MockRuntime;

    /// 호출마다 새 MockRuntime을 만드는 커넥터
    struct MockConnector {
        make: fn() -> MockRuntime,
    }

    impl Connector for MockConnector {
        type Runtime = MockRuntime;

        async fn connect(
            &self,
            _endpoint: &ConnectionEndpoint,
        ) -> Result<Established<MockRuntime>, ConnectionError> {
            Ok(Established {
                runtime: (self.make)(),
                tunnel: None,
            })
        }
    }

    fn runner(make: fn() -> MockRuntime, config: RunnerConfig) -> ScenarioRunner<MockConnector> {
        ScenarioRunner::new(Arc::new(MockConnector { make }), Arc::new(config))
    }

    fn descriptor() -> ScenarioDescriptor {
        let json = r#"{
            "name": "unit",
            "servers": [{"uri": "unix:///run/podman.sock", "server": "xrd1",
                         "server_config": {"entrypoint": ["/start.sh"]}}],
            "test_config": {"test_command": ["xrdcp", "root://xrd1//data/f", "/tmp/f"],
                            "artefact_paths": ["/tmp/f"]}
        }"#;
        ScenarioDescriptor::load(json.as_bytes()).unwrap()
    }

    #[test]
    fn run_id_is_short_hex() {
        let id = new_run_id();
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn successful_run_reports_output_and_speed() {
        let runner = runner(
            || MockRuntime::new().with_logs("[42MB/s]"),
            RunnerConfig::default(),
        );
        let report = runner.run(&descriptor(), CancellationToken::new()).await;

        assert_eq!(report.result.outcome, RunOutcome::Success);
        assert_eq!(report.result.client_exit_code, Some(0));
        assert_eq!(report.transfer_speed_mbps, Some(42.0));
        assert_eq!(report.provisioned.len(), 1);
        assert_eq!(report.cleanup.containers_removed.len(), 2);
        assert_eq!(report.cleanup.artifacts_removed, vec!["/tmp/f".to_owned()]);
        assert_eq!(report.cleanup.connections_released, 1);
        assert!(report.cleanup.is_clean());
    }

    #[tokio::test]
    async fn non_zero_client_exit_is_client_failure() {
        let runner = runner(|| MockRuntime::new().with_exit_code(3), RunnerConfig::default());
        let report = runner.run(&descriptor(), CancellationToken::new()).await;

        assert_eq!(report.result.outcome, RunOutcome::ClientFailure);
        assert_eq!(report.result.client_exit_code, Some(3));
        assert_eq!(report.cleanup.containers_removed.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn client_timeout_has_no_exit_code() {
        let mut config = RunnerConfig::default();
        config.client_timeout = Duration::from_secs(5);
        let runner = runner(
            || MockRuntime::new().with_wait_delay(Duration::from_secs(60)),
            config,
        );
        let report = runner.run(&descriptor(), CancellationToken::new()).await;

        assert_eq!(report.result.outcome, RunOutcome::ClientFailure);
        assert_eq!(report.result.client_exit_code, None);
        assert!(matches!(
            report.result.cause,
            Some(FailureCause::ClientTimeout { after_secs: 5 })
        ));
        assert_eq!(report.cleanup.containers_removed.len(), 2);
    }

    #[tokio::test]
    async fn cancelled_before_start_still_cleans_up() {
        let runner = runner(MockRuntime::new, RunnerConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = runner.run(&descriptor(), cancel).await;

        assert_eq!(report.result.outcome, RunOutcome::Cancelled);
        assert!(report.cleanup.containers_removed.is_empty());
        assert!(report.cleanup.is_clean());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_create_still_removes_the_container() {
        let runner = runner(
            || MockRuntime::new().with_create_delay(Duration::from_secs(60)),
            RunnerConfig::default(),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let report = runner.run(&descriptor(), cancel).await;

        assert_eq!(report.result.outcome, RunOutcome::Cancelled);
        assert_eq!(report.cleanup.containers_removed.len(), 1);
        assert!(report.cleanup.containers_removed[0].starts_with("xrootd-server-xrd1-"));
        // 클라이언트는 만들지 않음
        assert!(report.cleanup.artifacts_removed.is_empty());
    }

    #[tokio::test]
    async fn extra_env_overrides_scenario_env() {
        let json = r#"{
            "servers": [{"uri": "unix:///run/podman.sock", "server": "xrd1"}],
            "test_config": {"test_command": ["env"], "test_env": {"A": "scenario", "B": "kept"}}
        }"#;
        let d = ScenarioDescriptor::load(json.as_bytes()).unwrap();
        let mut config = RunnerConfig::default();
        config.extra_env.insert("A".to_owned(), "cli".to_owned());

        // 클라이언트 spec을 확인하기 위해 runner 내부 로직을 직접 호출
        let runner = runner(MockRuntime::new, config);
        let connections = ConnectionManager::new(
            Arc::clone(&runner.connector),
            RetryPolicy::from_config(&runner.config),
        );
        let mut state = RunState::new("t1", connections);
        let mut capture = Capture::default();
        let result = runner
            .run_client(&d, &mut state, &mut capture, &CancellationToken::new())
            .await;
        assert_eq!(result.outcome, RunOutcome::Success);

        let conn = state.connections.get(&d.client.endpoint).unwrap();
        let created = conn.runtime().created.lock().unwrap().clone();
        let env = &created[0].1.environment;
        assert_eq!(env.get("A").map(String::as_str), Some("cli"));
        assert_eq!(env.get("B").map(String::as_str), Some("kept"));

        let report = cleanup::finalize(state, &runner.config).await;
        assert_eq!(report.containers_removed.len(), 1);
    }
}
