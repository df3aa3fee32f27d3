//! Container runtime API abstraction for testability.
//!
//! The [`ContainerRuntime`] trait abstracts the Docker-compatible management
//! API (Docker or Podman sockets), allowing production code to use
//! [`BollardRuntime`] while tests use `MockRuntime`.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐     ┌────────────────┐
//! │ RoleProvisioner│     │ cleanup::final │
//! └───────┬────────┘     └───────┬────────┘
//!         └──────────┬───────────┘
//!                    ▼
//!              ┌──────────┐
//!              │Connection│ (serializes commands)
//!              └────┬─────┘
//!                   ▼
//!           ┌────────────────┐
//!           │ContainerRuntime│ (trait)
//!           └────────────────┘
//!               │        │
//!               ▼        ▼
//!          ┌───────┐ ┌──────┐
//!          │Bollard│ │ Mock │
//!          └───┬───┘ └──────┘
//!              ▼
//!        runtime daemon socket
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;

use crate::error::RuntimeError;

/// Everything needed to create one container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Deterministic container name
    pub name: String,
    /// Image reference (`repo:tag`)
    pub image: String,
    /// Entrypoint override; empty keeps the image default
    pub entrypoint: Vec<String>,
    /// Command arguments; empty keeps the image default
    pub command: Vec<String>,
    pub environment: BTreeMap<String, String>,
    /// Bind mounts in `source:target:mode` form
    pub binds: Vec<String>,
    /// Share the host network namespace
    pub host_network: bool,
    pub tty: bool,
}

impl ContainerSpec {
    fn env_list(&self) -> Option<Vec<String>> {
        if self.environment.is_empty() {
            return None;
        }
        Some(
            self.environment
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect(),
        )
    }
}

/// Trait abstracting container runtime operations.
///
/// The trait is `Send + Sync + 'static` so a runtime can be shared across
/// async tasks behind an `Arc`.
///
/// # Error Handling
///
/// - **404 on a container**: `RuntimeError::NotFound`
/// - **404 on create (image missing)**: `RuntimeError::ImageNotFound`
/// - **Socket errors**: `RuntimeError::Connection`
/// - **Everything else**: `RuntimeError::Api`
pub trait ContainerRuntime: Send + Sync + 'static {
    /// Checks daemon connectivity.
    fn ping(&self) -> impl Future<Output = Result<(), RuntimeError>> + Send;

    /// Pulls an image so that a later create can succeed.
    fn pull_image(&self, image: &str) -> impl Future<Output = Result<(), RuntimeError>> + Send;

    /// Creates a container and returns its ID.
    fn create_container(
        &self,
        spec: &ContainerSpec,
    ) -> impl Future<Output = Result<String, RuntimeError>> + Send;

    /// Starts a created container.
    fn start_container(&self, id: &str) -> impl Future<Output = Result<(), RuntimeError>> + Send;

    /// Waits until the container is no longer running and returns its exit code.
    fn wait_container(&self, id: &str) -> impl Future<Output = Result<i64, RuntimeError>> + Send;

    /// Returns the combined stdout/stderr of a container.
    fn container_logs(&self, id: &str)
    -> impl Future<Output = Result<String, RuntimeError>> + Send;

    /// Stops a container, sending SIGKILL after `grace`.
    ///
    /// Stopping an already stopped container is not an error.
    fn stop_container(
        &self,
        id: &str,
        grace: Duration,
    ) -> impl Future<Output = Result<(), RuntimeError>> + Send;

    /// Force-removes a container by ID or name.
    fn remove_container(
        &self,
        id_or_name: &str,
    ) -> impl Future<Output = Result<(), RuntimeError>> + Send;
}

/// Production runtime client implementation using `bollard`.
///
/// Speaks the Docker-compatible HTTP API over a unix socket. Podman's
/// compatibility socket works the same way.
pub struct BollardRuntime {
    docker: Arc<bollard::Docker>,
}

impl BollardRuntime {
    /// Creates a client for the socket at `socket_path`.
    ///
    /// No traffic is sent until the first call; use [`ContainerRuntime::ping`]
    /// to confirm the daemon is reachable.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::Connection` if the client cannot be built.
    pub fn connect_with_socket(socket_path: &str, timeout: Duration) -> Result<Self, RuntimeError> {
        let docker = bollard::Docker::connect_with_socket(
            socket_path,
            timeout.as_secs().max(1),
            bollard::API_DEFAULT_VERSION,
        )
        .map_err(|e| {
            RuntimeError::Connection(format!("failed to connect to runtime at {socket_path}: {e}"))
        })?;
        Ok(Self {
            docker: Arc::new(docker),
        })
    }
}

/// Extracts the HTTP status from a bollard error, if it has one.
fn status_code(err: &bollard::errors::Error) -> Option<u16> {
    match err {
        bollard::errors::Error::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

fn map_container_error(id: &str, action: &str, err: bollard::errors::Error) -> RuntimeError {
    match status_code(&err) {
        Some(404) => RuntimeError::NotFound(id.to_owned()),
        Some(_) => RuntimeError::Api(format!("{action} '{id}' failed: {err}")),
        None => RuntimeError::Connection(format!("{action} '{id}' failed: {err}")),
    }
}

/// Splits `repo[:tag]` for the pull API. A missing tag means `latest`.
fn split_image_reference(image: &str) -> (&str, &str) {
    let name_start = image.rfind('/').map_or(0, |i| i + 1);
    match image[name_start..].rfind(':') {
        Some(i) => (&image[..name_start + i], &image[name_start + i + 1..]),
        None => (image, "latest"),
    }
}

impl ContainerRuntime for BollardRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker
            .ping()
            .await
            .map_err(|e| RuntimeError::Connection(format!("ping failed: {e}")))?;
        Ok(())
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        use bollard::image::CreateImageOptions;

        let (repo, tag) = split_image_reference(image);
        let options = CreateImageOptions {
            from_image: repo,
            tag,
            ..Default::default()
        };

        let mut progress = self.docker.create_image(Some(options), None, None);
        while let Some(item) = progress.next().await {
            item.map_err(|e| RuntimeError::Api(format!("pull '{image}' failed: {e}")))?;
        }
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        use bollard::container::{Config, CreateContainerOptions};
        use bollard::models::HostConfig;

        let host_config = HostConfig {
            binds: (!spec.binds.is_empty()).then(|| spec.binds.clone()),
            network_mode: spec.host_network.then(|| "host".to_owned()),
            ..Default::default()
        };

        let config = Config::<String> {
            image: Some(spec.image.clone()),
            entrypoint: (!spec.entrypoint.is_empty()).then(|| spec.entrypoint.clone()),
            cmd: (!spec.command.is_empty()).then(|| spec.command.clone()),
            env: spec.env_list(),
            tty: Some(spec.tty),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| match status_code(&e) {
                Some(404) => RuntimeError::ImageNotFound(spec.image.clone()),
                Some(_) => RuntimeError::Api(format!("create '{}' failed: {e}", spec.name)),
                None => RuntimeError::Connection(format!("create '{}' failed: {e}", spec.name)),
            })?;

        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        use bollard::container::StartContainerOptions;

        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| map_container_error(id, "start", e))
    }

    async fn wait_container(&self, id: &str) -> Result<i64, RuntimeError> {
        use bollard::container::WaitContainerOptions;

        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(id, Some(options));
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard은 0이 아닌 종료 코드를 에러로 돌려줌
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(map_container_error(id, "wait", e)),
            None => Err(RuntimeError::Api(format!(
                "wait '{id}' ended without a status"
            ))),
        }
    }

    async fn container_logs(&self, id: &str) -> Result<String, RuntimeError> {
        use bollard::container::LogsOptions;

        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: "all".to_owned(),
            ..Default::default()
        };

        let mut stream = self.docker.logs(id, Some(options));
        let mut output = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| map_container_error(id, "logs", e))?;
            output.extend_from_slice(&chunk.into_bytes());
        }
        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), RuntimeError> {
        use bollard::container::StopContainerOptions;

        let options = StopContainerOptions {
            t: i64::try_from(grace.as_secs()).unwrap_or(i64::MAX),
        };
        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            // 304: 이미 정지됨
            Err(e) if status_code(&e) == Some(304) => Ok(()),
            Err(e) => Err(map_container_error(id, "stop", e)),
        }
    }

    async fn remove_container(&self, id_or_name: &str) -> Result<(), RuntimeError> {
        use bollard::container::RemoveContainerOptions;

        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(id_or_name, Some(options))
            .await
            .map_err(|e| map_container_error(id_or_name, "remove", e))
    }
}

/// 테스트용 Mock 런타임
///
/// 호출을 순서대로 기록하고, 설정에 따라 실패를 흉내냅니다.
#[cfg(test)]
#[derive(Default)]
pub struct MockRuntime {
    /// 기록된 호출 (`create:<name>`, `start:<id>`, ...)
    pub calls: std::sync::Mutex<Vec<String>>,
    /// 생성된 컨테이너 (id → spec)
    pub created: std::sync::Mutex<Vec<(String, ContainerSpec)>>,
    /// 이름에 이 문자열이 포함되면 create 실패
    pub fail_create_matching: Option<String>,
    /// 이름에 이 문자열이 포함되면 start 실패
    pub fail_start_matching: Option<String>,
    /// 명령에 이 문자열이 포함되면 종료 코드 1
    pub fail_exit_matching: Option<String>,
    /// wait가 반환할 종료 코드
    pub exit_code: i64,
    /// wait 전에 기다릴 시간
    pub wait_delay: Option<Duration>,
    /// create가 끝나기 전에 기다릴 시간
    pub create_delay: Option<Duration>,
    /// logs가 반환할 출력
    pub logs: String,
    /// 처음 create 시 ImageNotFound를 돌려줄 이미지
    pub missing_images: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failing_create(mut self, name_part: &str) -> Self {
        self.fail_create_matching = Some(name_part.to_owned());
        self
    }

    pub fn with_failing_start(mut self, name_part: &str) -> Self {
        self.fail_start_matching = Some(name_part.to_owned());
        self
    }

    pub fn with_failing_command(mut self, arg_part: &str) -> Self {
        self.fail_exit_matching = Some(arg_part.to_owned());
        self
    }

    pub fn with_exit_code(mut self, code: i64) -> Self {
        self.exit_code = code;
        self
    }

    pub fn with_wait_delay(mut self, delay: Duration) -> Self {
        self.wait_delay = Some(delay);
        self
    }

    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    pub fn with_logs(mut self, logs: &str) -> Self {
        self.logs = logs.to_owned();
        self
    }

    pub fn with_missing_image(self, image: &str) -> Self {
        self.missing_images
            .lock()
            .unwrap()
            .push(image.to_owned());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn spec_of(&self, id: &str) -> Option<ContainerSpec> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .find(|(cid, _)| cid == id)
            .map(|(_, spec)| spec.clone())
    }
}

#[cfg(test)]
impl ContainerRuntime for MockRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.record(format!("pull:{image}"));
        self.missing_images.lock().unwrap().retain(|i| i != image);
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        self.record(format!("create:{}", spec.name));
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        if self.missing_images.lock().unwrap().contains(&spec.image) {
            return Err(RuntimeError::ImageNotFound(spec.image.clone()));
        }
        if self
            .fail_create_matching
            .as_deref()
            .is_some_and(|part| spec.name.contains(part))
        {
            return Err(RuntimeError::Api("mock create failure".to_owned()));
        }
        let id = format!("id-{}", spec.name);
        self.created.lock().unwrap().push((id.clone(), spec.clone()));
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(format!("start:{id}"));
        if self
            .fail_start_matching
            .as_deref()
            .is_some_and(|part| id.contains(part))
        {
            return Err(RuntimeError::Api("mock start failure".to_owned()));
        }
        Ok(())
    }

    async fn wait_container(&self, id: &str) -> Result<i64, RuntimeError> {
        self.record(format!("wait:{id}"));
        if let Some(delay) = self.wait_delay {
            tokio::time::sleep(delay).await;
        }
        if let (Some(part), Some(spec)) = (self.fail_exit_matching.as_deref(), self.spec_of(id)) {
            if spec.command.iter().any(|a| a.contains(part)) {
                return Ok(1);
            }
        }
        Ok(self.exit_code)
    }

    async fn container_logs(&self, id: &str) -> Result<String, RuntimeError> {
        self.record(format!("logs:{id}"));
        Ok(self.logs.clone())
    }

    async fn stop_container(&self, id: &str, _grace: Duration) -> Result<(), RuntimeError> {
        self.record(format!("stop:{id}"));
        Ok(())
    }

    async fn remove_container(&self, id_or_name: &str) -> Result<(), RuntimeError> {
        self.record(format!("remove:{id_or_name}"));
        if id_or_name.starts_with("id-") {
            Ok(())
        } else {
            // 이름으로 지우는 경우: 오래된 컨테이너 없음
            Err(RuntimeError::NotFound(id_or_name.to_owned()))
        }
    }
}
