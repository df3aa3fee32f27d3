//! 연결 관리자: 엔드포인트별 런타임 연결 수립, 공유, 해제
//!
//! 한 실행 안에서 동등한 엔드포인트는 항상 같은 [`Connection`]으로
//! 해석됩니다. 연결 수립은 [`Connector`] trait 뒤에 있어 런타임 없이도
//! 중복 제거와 재시도 동작을 테스트할 수 있습니다.
//!
//! # 재시도 정책
//! - 시도마다 `connect_timeout` 제한
//! - 실패 후 `base * 2^(n-1)` 대기 (`backoff_max`로 상한)
//! - `AuthFailed`는 재시도하지 않음

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use xrdtest_core::ConnectionEndpoint;
use xrdtest_core::metrics as m;

use crate::config::RunnerConfig;
use crate::error::{ConnectionError, ConnectionErrorKind, RuntimeError};
use crate::runtime::{BollardRuntime, ContainerRuntime, ContainerSpec};
use crate::transport::{SshTunnel, TunnelTarget};

/// 수립된 런타임 클라이언트와 (원격이면) 그 전송 계층
pub struct Established<R> {
    pub runtime: R,
    pub tunnel: Option<SshTunnel>,
}

/// 엔드포인트에서 런타임 클라이언트를 만드는 방법
pub trait Connector: Send + Sync + 'static {
    type Runtime: ContainerRuntime;

    /// 연결을 한 번 시도합니다. 재시도와 ping 확인은 관리자가 합니다.
    fn connect(
        &self,
        endpoint: &ConnectionEndpoint,
    ) -> impl Future<Output = Result<Established<Self::Runtime>, ConnectionError>> + Send;
}

/// bollard 기반 커넥터. 원격 엔드포인트는 ssh 터널을 먼저 엽니다.
pub struct BollardConnector {
    ssh_binary: String,
    connect_timeout: Duration,
}

impl BollardConnector {
    pub fn new(config: &RunnerConfig) -> Self {
        Self {
            ssh_binary: config.ssh_binary.clone(),
            connect_timeout: config.connect_timeout,
        }
    }
}

impl Connector for BollardConnector {
    type Runtime = BollardRuntime;

    async fn connect(
        &self,
        endpoint: &ConnectionEndpoint,
    ) -> Result<Established<BollardRuntime>, ConnectionError> {
        let unreachable = |e: RuntimeError| {
            ConnectionError::new(ConnectionErrorKind::Unreachable, endpoint, e.to_string())
        };

        match endpoint {
            ConnectionEndpoint::Local { socket_path } => {
                let runtime = BollardRuntime::connect_with_socket(socket_path, self.connect_timeout)
                    .map_err(unreachable)?;
                Ok(Established {
                    runtime,
                    tunnel: None,
                })
            }
            ConnectionEndpoint::Remote {
                transport_user,
                transport_host,
                transport_port,
                socket_path,
            } => {
                let target = TunnelTarget {
                    user: transport_user,
                    host: transport_host,
                    port: *transport_port,
                    remote_socket: socket_path,
                };
                let tunnel =
                    SshTunnel::open(&self.ssh_binary, &target, self.connect_timeout).await?;
                let local = tunnel.local_socket().to_string_lossy().into_owned();
                let runtime = BollardRuntime::connect_with_socket(&local, self.connect_timeout)
                    .map_err(unreachable)?;
                Ok(Established {
                    runtime,
                    tunnel: Some(tunnel),
                })
            }
        }
    }
}

/// 하나의 엔드포인트에 대한 공유 런타임 연결
///
/// 모든 명령은 내부 비동기 뮤텍스를 거쳐 한 번에 하나씩 실행됩니다.
pub struct Connection<R> {
    endpoint: ConnectionEndpoint,
    runtime: R,
    gate: Mutex<()>,
    tunnel: Mutex<Option<SshTunnel>>,
}

impl<R: ContainerRuntime> Connection<R> {
    pub fn new(endpoint: ConnectionEndpoint, established: Established<R>) -> Self {
        Self {
            endpoint,
            runtime: established.runtime,
            gate: Mutex::new(()),
            tunnel: Mutex::new(established.tunnel),
        }
    }

    pub fn endpoint(&self) -> &ConnectionEndpoint {
        &self.endpoint
    }

    /// 내부 런타임 (테스트에서 호출 기록 확인용)
    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub async fn ping(&self) -> Result<(), RuntimeError> {
        let _gate = self.gate.lock().await;
        self.runtime.ping().await
    }

    pub async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        let _gate = self.gate.lock().await;
        self.runtime.pull_image(image).await
    }

    pub async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let _gate = self.gate.lock().await;
        self.runtime.create_container(spec).await
    }

    pub async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        let _gate = self.gate.lock().await;
        self.runtime.start_container(id).await
    }

    pub async fn wait_container(&self, id: &str) -> Result<i64, RuntimeError> {
        let _gate = self.gate.lock().await;
        self.runtime.wait_container(id).await
    }

    pub async fn container_logs(&self, id: &str) -> Result<String, RuntimeError> {
        let _gate = self.gate.lock().await;
        self.runtime.container_logs(id).await
    }

    pub async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), RuntimeError> {
        let _gate = self.gate.lock().await;
        self.runtime.stop_container(id, grace).await
    }

    pub async fn remove_container(&self, id_or_name: &str) -> Result<(), RuntimeError> {
        let _gate = self.gate.lock().await;
        self.runtime.remove_container(id_or_name).await
    }

    /// 전송 계층을 닫습니다. 두 번째 호출부터는 아무것도 하지 않습니다.
    pub async fn close(&self) -> std::io::Result<()> {
        let tunnel = self.tunnel.lock().await.take();
        match tunnel {
            Some(tunnel) => tunnel.close().await,
            None => Ok(()),
        }
    }
}

/// 재시도 정책
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub attempt_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            attempts: config.connect_retry_attempts.max(1),
            attempt_timeout: config.connect_timeout,
            backoff_base: config.connect_backoff_base,
            backoff_max: config.connect_backoff_max,
        }
    }

    /// `attempt`번째 실패 후 대기 시간 (1부터 시작)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_max)
    }
}

/// 실행 하나가 소유하는 연결 집합
pub struct ConnectionManager<C: Connector> {
    connector: Arc<C>,
    policy: RetryPolicy,
    connections: HashMap<ConnectionEndpoint, Arc<Connection<C::Runtime>>>,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: Arc<C>, policy: RetryPolicy) -> Self {
        Self {
            connector,
            policy,
            connections: HashMap::new(),
        }
    }

    /// 엔드포인트의 연결을 반환합니다. 없으면 재시도 정책에 따라 수립합니다.
    pub async fn acquire(
        &mut self,
        endpoint: &ConnectionEndpoint,
    ) -> Result<Arc<Connection<C::Runtime>>, ConnectionError> {
        if let Some(existing) = self.connections.get(endpoint) {
            debug!(endpoint = %endpoint, "reusing connection");
            return Ok(Arc::clone(existing));
        }

        let connection = Arc::new(self.establish(endpoint).await?);
        self.connections
            .insert(endpoint.clone(), Arc::clone(&connection));
        metrics::counter!(m::CONNECTIONS_ESTABLISHED_TOTAL, m::LABEL_TRANSPORT => endpoint.transport_name())
            .increment(1);
        Ok(connection)
    }

    async fn establish(
        &self,
        endpoint: &ConnectionEndpoint,
    ) -> Result<Connection<C::Runtime>, ConnectionError> {
        let mut attempt = 1;
        loop {
            let result = tokio::time::timeout(self.policy.attempt_timeout, self.try_once(endpoint))
                .await
                .unwrap_or_else(|_| {
                    Err(ConnectionError::new(
                        ConnectionErrorKind::Timeout,
                        endpoint,
                        format!(
                            "attempt exceeded {}ms",
                            self.policy.attempt_timeout.as_millis()
                        ),
                    ))
                });

            match result {
                Ok(connection) => {
                    info!(endpoint = %endpoint, attempt, "runtime connection established");
                    return Ok(connection);
                }
                Err(e) if e.is_permanent() || attempt >= self.policy.attempts => {
                    warn!(endpoint = %endpoint, attempt, error = %e, "giving up on connection");
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        endpoint = %endpoint,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "connection attempt failed, retrying"
                    );
                    metrics::counter!(m::CONNECTION_RETRIES_TOTAL).increment(1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn try_once(
        &self,
        endpoint: &ConnectionEndpoint,
    ) -> Result<Connection<C::Runtime>, ConnectionError> {
        let established = self.connector.connect(endpoint).await?;
        let connection = Connection::new(endpoint.clone(), established);
        if let Err(e) = connection.ping().await {
            let _ = connection.close().await;
            return Err(ConnectionError::new(
                ConnectionErrorKind::Unreachable,
                endpoint,
                e.to_string(),
            ));
        }
        Ok(connection)
    }

    /// 이미 수립된 연결을 조회합니다.
    pub fn get(&self, endpoint: &ConnectionEndpoint) -> Option<Arc<Connection<C::Runtime>>> {
        self.connections.get(endpoint).cloned()
    }

    /// 현재 살아 있는 연결 수
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// 엔드포인트의 연결을 해제합니다. 없는 엔드포인트면 아무것도 하지 않습니다.
    pub async fn release(&mut self, endpoint: &ConnectionEndpoint) -> std::io::Result<()> {
        match self.connections.remove(endpoint) {
            Some(connection) => {
                debug!(endpoint = %endpoint, "releasing connection");
                connection.close().await
            }
            None => Ok(()),
        }
    }

    /// 모든 연결을 해제하고 실패한 엔드포인트를 반환합니다.
    pub async fn release_all(&mut self) -> Vec<(ConnectionEndpoint, std::io::Error)> {
        let mut endpoints: Vec<_> = self.connections.keys().cloned().collect();
        endpoints.sort();

        let mut failures = Vec::new();
        for endpoint in endpoints {
            if let Err(e) = self.release(&endpoint).await {
                failures.push((endpoint, e));
            }
        }
        failures
    }
}
