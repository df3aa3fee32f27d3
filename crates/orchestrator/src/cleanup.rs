//! 아티팩트 삭제와 정리
//!
//! [`finalize`]는 실행 상태를 소비하므로 실행마다 한 번만 호출될 수 있습니다.
//! 모든 단계는 앞 단계의 실패와 무관하게 수행되고, 실패는
//! [`CleanupReport::errors`]에 모일 뿐 상위로 전파되지 않습니다.
//!
//! 1. 엔드포인트별로 모든 컨테이너 정지 (엔드포인트끼리는 동시에)
//! 2. 서버 컨테이너 로그 수집 (정지 후 출력까지 포함)
//! 3. 클라이언트 호스트에서 아티팩트 경로 삭제 (클라이언트가 시작된 경우만)
//! 4. 엔드포인트별로 컨테이너 강제 삭제 (엔드포인트끼리는 동시에)
//! 5. 모든 연결 해제
//!
//! 아티팩트 헬퍼는 클라이언트가 정지된 뒤에만 실행되므로, 시간 초과나
//! 취소로 끝난 클라이언트가 삭제된 파일을 다시 쓰지 못합니다.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};
use xrdtest_core::ConnectionEndpoint;
use xrdtest_core::metrics as m;

use crate::config::RunnerConfig;
use crate::connection::{Connection, Connector};
use crate::error::{CleanupError, CleanupStep};
use crate::provision::create_with_pull;
use crate::runner::RunState;
use crate::runtime::{ContainerRuntime, ContainerSpec};
use crate::teardown::TrackedContainer;

/// 서버 컨테이너 하나의 로그
#[derive(Debug, Clone, Serialize)]
pub struct ContainerLog {
    pub role: String,
    pub container: String,
    pub output: String,
}

/// 정리 결과
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    /// 삭제에 성공한 아티팩트 경로
    pub artifacts_removed: Vec<String>,
    /// 삭제된 컨테이너 이름
    pub containers_removed: Vec<String>,
    pub server_logs: Vec<ContainerLog>,
    pub connections_released: usize,
    pub errors: Vec<CleanupError>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    fn record(&mut self, error: CleanupError) {
        warn!(step = %error.step, target = %error.target, reason = %error.reason, "cleanup step failed");
        metrics::counter!(m::CLEANUP_ERRORS_TOTAL, m::LABEL_STEP => error.step.as_str())
            .increment(1);
        self.errors.push(error);
    }
}

/// 실행이 만든 모든 자원을 정리합니다.
pub async fn finalize<C: Connector>(state: RunState<C>, config: &RunnerConfig) -> CleanupReport {
    let RunState {
        run_id,
        mut connections,
        teardown,
        client,
    } = state;
    let mut report = CleanupReport::default();

    info!(
        run_id = %run_id,
        containers = teardown.len(),
        connections = connections.len(),
        "cleaning up run"
    );

    let servers: Vec<TrackedContainer> = teardown.servers().cloned().collect();
    let groups: Vec<_> = teardown
        .into_groups()
        .into_iter()
        .map(|(endpoint, containers)| {
            let conn = connections.get(&endpoint);
            (endpoint, conn, containers)
        })
        .collect();

    // 1. 정지
    let stops = groups
        .iter()
        .filter_map(|(_, conn, containers)| {
            conn.as_deref()
                .map(|conn| stop_group(conn, containers, config.stop_grace))
        });
    for errors in join_all(stops).await {
        for error in errors {
            report.record(error);
        }
    }

    // 2. 서버 로그
    for container in &servers {
        let Some(conn) = connections.get(&container.endpoint) else {
            continue;
        };
        match conn.container_logs(&container.id).await {
            Ok(output) => report.server_logs.push(ContainerLog {
                role: container.role.clone(),
                container: container.name.clone(),
                output,
            }),
            Err(e) => report.record(CleanupError::new(CleanupStep::LogCapture, &container.name, e)),
        }
    }

    // 3. 아티팩트
    match &client {
        Some(handle) if handle.started => match connections.get(&handle.endpoint) {
            Some(conn) => {
                for (index, path) in handle.artifact_paths.iter().enumerate() {
                    match remove_artifact(&conn, config, &run_id, index, path, &handle.binds).await {
                        Ok(()) => {
                            debug!(path = %path, "artifact removed");
                            report.artifacts_removed.push(path.clone());
                        }
                        Err(reason) => {
                            report.record(CleanupError::new(CleanupStep::ArtifactRemove, path, reason));
                        }
                    }
                }
            }
            None => {
                for path in &handle.artifact_paths {
                    report.record(CleanupError::new(
                        CleanupStep::ArtifactRemove,
                        path,
                        "client connection is not available",
                    ));
                }
            }
        },
        Some(handle) if !handle.artifact_paths.is_empty() => {
            debug!("client never started, skipping artifact removal");
        }
        _ => {}
    }

    // 4. 삭제
    let removals = groups
        .into_iter()
        .map(|(endpoint, conn, containers)| remove_group(endpoint, conn, containers));
    for (removed, errors) in join_all(removals).await {
        report.containers_removed.extend(removed);
        for error in errors {
            report.record(error);
        }
    }

    // 5. 연결 해제
    let total = connections.len();
    let failures = connections.release_all().await;
    report.connections_released = total - failures.len();
    for (endpoint, e) in failures {
        report.record(CleanupError::new(
            CleanupStep::ConnectionRelease,
            endpoint.to_string(),
            e,
        ));
    }

    info!(
        run_id = %run_id,
        removed = report.containers_removed.len(),
        errors = report.errors.len(),
        "cleanup finished"
    );
    report
}

/// 헬퍼 컨테이너로 `rm -f <path>`를 실행합니다.
async fn remove_artifact<R: ContainerRuntime>(
    conn: &Connection<R>,
    config: &RunnerConfig,
    run_id: &str,
    index: usize,
    path: &str,
    binds: &[String],
) -> Result<(), String> {
    let spec = ContainerSpec {
        name: format!("{}-cleanup-{run_id}-{index}", config.name_prefix),
        image: config.cleanup_image.clone(),
        command: vec!["rm".to_owned(), "-f".to_owned(), path.to_owned()],
        binds: binds.to_vec(),
        ..Default::default()
    };

    let id = create_with_pull(conn, &spec)
        .await
        .map_err(|e| format!("helper create failed: {e}"))?;

    let outcome = match conn.start_container(&id).await {
        Ok(()) => conn.wait_container(&id).await,
        Err(e) => Err(e),
    };

    if let Err(e) = conn.remove_container(&id).await {
        warn!(container = %spec.name, error = %e, "failed to remove cleanup helper");
    }

    match outcome {
        Ok(0) => Ok(()),
        Ok(code) => Err(format!("rm exited with code {code}")),
        Err(e) => Err(format!("helper failed: {e}")),
    }
}

/// 한 엔드포인트의 컨테이너를 순서대로 정지합니다. 이미 없는 컨테이너는 무시합니다.
async fn stop_group<R: ContainerRuntime>(
    conn: &Connection<R>,
    containers: &[TrackedContainer],
    grace: Duration,
) -> Vec<CleanupError> {
    let mut errors = Vec::new();
    for container in containers {
        match conn.stop_container(&container.id, grace).await {
            Ok(()) => debug!(container = %container.name, "container stopped"),
            Err(e) if e.is_not_found() => {}
            Err(e) => errors.push(CleanupError::new(CleanupStep::ContainerStop, &container.name, e)),
        }
    }
    errors
}

/// 한 엔드포인트의 컨테이너를 순서대로 강제 삭제합니다.
async fn remove_group<R: ContainerRuntime>(
    endpoint: ConnectionEndpoint,
    conn: Option<Arc<Connection<R>>>,
    containers: Vec<TrackedContainer>,
) -> (Vec<String>, Vec<CleanupError>) {
    let mut removed = Vec::new();
    let mut errors = Vec::new();

    let Some(conn) = conn else {
        for container in containers {
            errors.push(CleanupError::new(
                CleanupStep::ContainerRemove,
                container.name,
                format!("no connection to {endpoint}"),
            ));
        }
        return (removed, errors);
    };

    for container in containers {
        match conn.remove_container(&container.id).await {
            Ok(()) => {
                debug!(container = %container.name, endpoint = %endpoint, "container removed");
                removed.push(container.name);
            }
            // 이미 없는 컨테이너는 정리된 것으로 간주
            Err(e) if e.is_not_found() => removed.push(container.name),
            Err(e) => errors.push(CleanupError::new(CleanupStep::ContainerRemove, container.name, e)),
        }
    }

    (removed, errors)
}
