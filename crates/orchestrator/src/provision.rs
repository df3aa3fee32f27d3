//! 역할 프로비저닝: 서버 컨테이너 생성, 시작, 준비 상태 확인
//!
//! 역할 하나를 다음 순서로 띄웁니다.
//! 1. 같은 이름의 오래된 컨테이너 제거
//! 2. create (이미지가 없으면 pull 후 한 번 더)
//! 3. teardown 목록에 등록
//! 4. start
//! 5. `awaited_port`가 있으면 TCP 연결이 될 때까지 대기
//!
//! 취소는 create 앞뒤에서만 확인합니다. create와 등록 사이에는 끼어들지
//! 않으므로 런타임이 만든 컨테이너는 반드시 teardown 목록에 들어갑니다.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use xrdtest_core::metrics as m;
use xrdtest_core::{RoleKind, ScenarioDescriptor, ServerRole};

use crate::config::RunnerConfig;
use crate::connection::Connection;
use crate::error::{ProvisionError, ProvisionErrorKind, RuntimeError};
use crate::runtime::{ContainerRuntime, ContainerSpec};
use crate::teardown::{TeardownSet, TrackedContainer};

/// 테스트 클라이언트의 역할 레이블
pub const CLIENT_ROLE: &str = "test-client";

/// 프로비저닝이 끝난 서버 컨테이너
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionedContainer {
    pub role: String,
    pub name: String,
    pub id: String,
    pub image: String,
}

/// 프로비저닝이 끝나지 못한 이유
#[derive(Debug)]
pub enum ProvisionHalt {
    Failed(ProvisionError),
    Cancelled,
}

impl From<ProvisionError> for ProvisionHalt {
    fn from(err: ProvisionError) -> Self {
        Self::Failed(err)
    }
}

/// `fut`을 취소 신호와 경쟁시킵니다. 취소되면 `None`을 반환합니다.
pub async fn until_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        output = fut => Some(output),
    }
}

/// 로그와 에러에 쓰는 역할 레이블 (`server[1]@xrd2.example.org`)
pub fn role_label(index: usize, role: &ServerRole) -> String {
    format!("{}[{index}]@{}", role.kind, role.host_identity)
}

/// 이미지 참조의 태그. 태그가 없으면 `latest`.
pub fn image_tag(image: &str) -> &str {
    let name_start = image.rfind('/').map_or(0, |i| i + 1);
    image[name_start..]
        .rsplit_once(':')
        .map_or("latest", |(_, tag)| tag)
}

/// 런타임이 허용하는 문자(`[A-Za-z0-9_.-]`)만 남깁니다.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// 서버 컨테이너 이름: `{prefix}-{kind}-{host}-{tag}`
pub fn server_container_name(prefix: &str, kind: RoleKind, host: &str, image: &str) -> String {
    sanitize(&format!(
        "{prefix}-{}-{}-{}",
        kind.name_stem(),
        host.replace('.', "-"),
        image_tag(image)
    ))
}

/// 클라이언트 컨테이너 이름: `{prefix}-test-client-{tag}-{run}`
pub fn client_container_name(prefix: &str, image: &str, run_id: &str) -> String {
    sanitize(&format!("{prefix}-test-client-{}-{run_id}", image_tag(image)))
}

/// 서버 이미지: CLI 서버 오버라이드 > 역할 지정 > CLI 기본 > 시나리오 기본
pub fn resolve_server_image(
    config: &RunnerConfig,
    descriptor: &ScenarioDescriptor,
    role: &ServerRole,
) -> String {
    config
        .server_version
        .clone()
        .or_else(|| {
            role.provisioning
                .as_ref()
                .and_then(|p| p.container_version.clone())
        })
        .or_else(|| config.container_version.clone())
        .unwrap_or_else(|| descriptor.default_container_version.clone())
}

/// 클라이언트 이미지: CLI 클라이언트 오버라이드 > 시나리오 지정 > CLI 기본 > 시나리오 기본
pub fn resolve_client_image(config: &RunnerConfig, descriptor: &ScenarioDescriptor) -> String {
    config
        .test_version
        .clone()
        .or_else(|| descriptor.client.container_version.clone())
        .or_else(|| config.container_version.clone())
        .unwrap_or_else(|| descriptor.default_container_version.clone())
}

/// 컨테이너를 만듭니다. 이미지가 없다고 하면 pull 후 한 번 더 시도합니다.
pub async fn create_with_pull<R: ContainerRuntime>(
    connection: &Connection<R>,
    spec: &ContainerSpec,
) -> Result<String, RuntimeError> {
    match connection.create_container(spec).await {
        Err(RuntimeError::ImageNotFound(image)) => {
            info!(image = %image, "image not present, pulling");
            connection.pull_image(&image).await?;
            connection.create_container(spec).await
        }
        other => other,
    }
}

/// 같은 이름의 이전 실행 잔여 컨테이너를 제거합니다. 없으면 무시합니다.
pub async fn remove_stale<R: ContainerRuntime>(connection: &Connection<R>, name: &str) {
    match connection.remove_container(name).await {
        Ok(()) => info!(container = %name, "removed stale container"),
        Err(e) if e.is_not_found() => {}
        Err(e) => warn!(container = %name, error = %e, "failed to remove stale container"),
    }
}

/// `host:port`에 TCP 연결이 될 때까지 기다립니다.
pub async fn wait_until_reachable(
    host: &str,
    port: u16,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<(), String> {
    let deadline = tokio::time::Instant::now() + timeout;
    let attempt_timeout = poll_interval.max(Duration::from_millis(100));
    let mut last_error = String::from("no attempt made");

    loop {
        match tokio::time::timeout(attempt_timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_)) => return Ok(()),
            Ok(Err(e)) => last_error = e.to_string(),
            Err(_) => last_error = "connect attempt timed out".to_owned(),
        }

        if tokio::time::Instant::now() + poll_interval > deadline {
            return Err(format!(
                "{host}:{port} not reachable after {timeout:?}: {last_error}"
            ));
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// 서버 역할 프로비저너
pub struct RoleProvisioner {
    config: Arc<RunnerConfig>,
}

impl RoleProvisioner {
    pub fn new(config: Arc<RunnerConfig>) -> Self {
        Self { config }
    }

    /// 역할 하나를 생성, 시작하고 준비될 때까지 기다립니다.
    ///
    /// 참조 전용 역할은 호출하지 않아야 합니다. create가 성공하면
    /// 이후 단계가 실패하거나 취소되어도 컨테이너는 `teardown`에 남습니다.
    pub async fn provision<R: ContainerRuntime>(
        &self,
        index: usize,
        role: &ServerRole,
        descriptor: &ScenarioDescriptor,
        connection: &Connection<R>,
        teardown: &mut TeardownSet,
        cancel: &CancellationToken,
    ) -> Result<ProvisionedContainer, ProvisionHalt> {
        let label = role_label(index, role);
        let Some(provisioning) = &role.provisioning else {
            return Err(ProvisionError::new(
                ProvisionErrorKind::CreateFailed,
                label,
                "role is reference-only",
            )
            .into());
        };

        let image = resolve_server_image(&self.config, descriptor, role);
        let mut name = server_container_name(
            &self.config.name_prefix,
            role.kind,
            &role.host_identity,
            &image,
        );
        // 같은 실행에서 이미 쓴 이름이면 stale 제거가 그 컨테이너를 지우게 됨
        if teardown.contains_name(&name) {
            name = format!("{name}-{index}");
        }

        until_cancelled(cancel, remove_stale(connection, &name))
            .await
            .ok_or(ProvisionHalt::Cancelled)?;

        let spec = ContainerSpec {
            name: name.clone(),
            image: image.clone(),
            entrypoint: provisioning.entrypoint.clone(),
            command: Vec::new(),
            environment: Default::default(),
            binds: provisioning.mounts.iter().map(|m| m.bind_spec()).collect(),
            host_network: true,
            tty: true,
        };

        info!(role = %label, container = %name, image = %image, "creating server container");
        let id = create_with_pull(connection, &spec)
            .await
            .map_err(|e| fail(ProvisionErrorKind::CreateFailed, &label, e))?;

        teardown.register(TrackedContainer {
            role: label.clone(),
            name: name.clone(),
            id: id.clone(),
            endpoint: connection.endpoint().clone(),
            is_client: false,
        });
        if cancel.is_cancelled() {
            return Err(ProvisionHalt::Cancelled);
        }

        connection
            .start_container(&id)
            .await
            .map_err(|e| fail(ProvisionErrorKind::StartFailed, &label, e))?;

        match role.awaited_port {
            Some(port) => {
                debug!(role = %label, port, "waiting for readiness");
                let ready = wait_until_reachable(
                    &role.host_identity,
                    port,
                    self.config.readiness_timeout,
                    self.config.readiness_poll_interval,
                );
                until_cancelled(cancel, ready)
                    .await
                    .ok_or(ProvisionHalt::Cancelled)?
                    .map_err(|reason| fail(ProvisionErrorKind::ReadinessTimeout, &label, reason))?;
            }
            None => debug!(role = %label, "no port declared, ready on start"),
        }

        metrics::counter!(m::CONTAINERS_PROVISIONED_TOTAL).increment(1);
        info!(role = %label, container = %name, "server role ready");

        Ok(ProvisionedContainer {
            role: label,
            name,
            id,
            image,
        })
    }
}

fn fail(kind: ProvisionErrorKind, label: &str, reason: impl ToString) -> ProvisionError {
    let err = ProvisionError::new(kind, label, reason);
    warn!(role = %label, error = %err, "provisioning failed");
    metrics::counter!(m::PROVISION_FAILURES_TOTAL).increment(1);
    err
}
