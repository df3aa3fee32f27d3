//! 시나리오 디스크립터: JSON 시나리오 파일의 검증된 메모리 표현
//!
//! [`ScenarioDescriptor::load`]는 원시 바이트를 파싱하고 검증한 뒤
//! 루트 경로 토큰 치환을 즉시 수행합니다. 이후 컴포넌트는 치환이 끝난
//! 경로만 보게 됩니다.
//!
//! # 파일 형식
//! ```json
//! {
//!   "name": "redirector-copy",
//!   "default_version": "gridppedi/xrdtesting:xrd-v5.8.3",
//!   "test_root_path": "/srv/xrdtests/redirector",
//!   "servers": [
//!     { "uri": "unix:///run/user/1000/podman/podman.sock", "server": "xrd1", "port": 1094,
//!       "server_config": { "entrypoint": ["/scripts/start.sh"],
//!                          "volumes": { "TEST_PATH/xrd1.cfg": { "bind": "/etc/xrootd/xrootd.cfg", "mode": "ro" } } } }
//!   ],
//!   "test_config": { "uri": "unix:///run/user/1000/podman/podman.sock",
//!                    "test_command": ["xrdcp", "root://xrd1//data/f", "root://xrd2//data/f"],
//!                    "test_volumes": {}, "artefact_paths": ["/data/f"] }
//! }
//! ```

mod endpoint;
mod substitute;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DescriptorError, XrdtestError};

pub use endpoint::{ConnectionEndpoint, DEFAULT_SSH_PORT};
pub use substitute::{ROOT_PATH_TOKEN, substitute_root};

/// `default_version`이 없을 때 사용하는 이미지
pub const DEFAULT_CONTAINER_VERSION: &str = "gridppedi/xrdtesting:xrd-v5.8.3";

/// `test_root_path`가 없을 때 사용하는 루트 경로
pub const DEFAULT_TEST_ROOT_PATH: &str = "/tmp";

/// 검증된 시나리오 디스크립터. 로드 이후 변경되지 않습니다.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioDescriptor {
    pub name: String,
    pub description: String,
    pub version: String,
    /// 역할에 이미지 지정이 없을 때 쓰는 이미지
    pub default_container_version: String,
    /// `TEST_PATH` 토큰의 치환 대상
    pub test_root_path: String,
    /// 선언 순서 = 프로비저닝 순서
    pub servers: Vec<ServerRole>,
    pub client: ClientSpec,
}

/// 서버 역할 하나
#[derive(Debug, Clone, Serialize)]
pub struct ServerRole {
    pub endpoint: ConnectionEndpoint,
    /// 역할이 실행되는 호스트 이름 (준비 상태 확인 대상)
    pub host_identity: String,
    pub awaited_port: Option<u16>,
    pub kind: RoleKind,
    /// `None`이면 참조 전용 역할
    pub provisioning: Option<Provisioning>,
}

impl ServerRole {
    /// 엔진이 생명주기를 관리하지 않는 역할인지 여부
    pub fn is_reference_only(&self) -> bool {
        self.provisioning.is_none()
    }
}

/// 서버 역할의 종류
///
/// 역할마다 별도의 정적 설정 파일을 쓰므로 종류는 이름 짓기에만 쓰입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoleKind {
    /// 리디렉터 (클러스터 관리자)
    Manager,
    /// 일반 데이터 서버
    #[default]
    Server,
    /// HTTPS가 활성화된 데이터 서버
    HttpsServer,
    /// 토큰 인증 데이터 서버
    TokenServer,
}

impl RoleKind {
    /// 컨테이너 이름에 쓰는 고정 문자열
    pub fn name_stem(&self) -> &'static str {
        match self {
            Self::Manager => "manager",
            Self::Server => "server",
            Self::HttpsServer => "https-server",
            Self::TokenServer => "token-server",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "manager" | "redirector" => Some(Self::Manager),
            "server" => Some(Self::Server),
            "https-server" => Some(Self::HttpsServer),
            "token-server" => Some(Self::TokenServer),
            _ => None,
        }
    }
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name_stem())
    }
}

/// 프로비저닝 대상 역할의 컨테이너 설정
#[derive(Debug, Clone, Serialize)]
pub struct Provisioning {
    /// 비어 있으면 이미지 기본 entrypoint 사용
    pub entrypoint: Vec<String>,
    pub mounts: Vec<Mount>,
    /// 역할별 이미지 (시나리오 기본값보다 우선)
    pub container_version: Option<String>,
}

/// 바인드 마운트
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mount {
    /// 호스트 경로 (치환 완료)
    pub source: String,
    /// 컨테이너 내부 경로
    pub target: String,
    pub mode: MountMode,
}

impl Mount {
    /// 런타임 API의 `source:target:mode` 바인드 표기
    pub fn bind_spec(&self) -> String {
        format!("{}:{}:{}", self.source, self.target, self.mode)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MountMode {
    Ro,
    Rw,
}

impl fmt::Display for MountMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ro => f.write_str("ro"),
            Self::Rw => f.write_str("rw"),
        }
    }
}

/// 테스트 클라이언트 설정
#[derive(Debug, Clone, Serialize)]
pub struct ClientSpec {
    pub endpoint: ConnectionEndpoint,
    pub command: Vec<String>,
    pub mounts: Vec<Mount>,
    pub environment: BTreeMap<String, String>,
    /// 실행 후 클라이언트 호스트에서 삭제할 절대 경로
    pub artifact_paths: Vec<String>,
    /// 클라이언트 전용 이미지
    pub container_version: Option<String>,
}

// --- 원시 JSON 형태 ---

#[derive(Deserialize)]
struct RawScenario {
    name: Option<String>,
    description: Option<String>,
    version: Option<String>,
    default_version: Option<String>,
    #[serde(alias = "TEST_PATH")]
    test_root_path: Option<String>,
    servers: Option<Vec<RawServer>>,
    test_config: Option<RawClient>,
}

#[derive(Deserialize)]
struct RawServer {
    uri: Option<String>,
    server: Option<String>,
    port: Option<u16>,
    role: Option<String>,
    version: Option<String>,
    server_config: Option<RawServerConfig>,
}

#[derive(Deserialize)]
struct RawServerConfig {
    entrypoint: Option<Vec<String>>,
    volumes: Option<BTreeMap<String, RawVolume>>,
}

#[derive(Deserialize)]
struct RawVolume {
    bind: Option<String>,
    mode: Option<String>,
}

#[derive(Deserialize)]
struct RawClient {
    uri: Option<String>,
    test_command: Option<Vec<String>>,
    test_volumes: Option<BTreeMap<String, RawVolume>>,
    test_env: Option<BTreeMap<String, String>>,
    artefact_paths: Option<Vec<String>>,
    version: Option<String>,
}

impl ScenarioDescriptor {
    /// 원시 JSON 바이트에서 디스크립터를 로드하고 검증합니다.
    pub fn load(raw: &[u8]) -> Result<Self, DescriptorError> {
        let raw: RawScenario = serde_json::from_slice(raw)
            .map_err(|e| DescriptorError::malformed("$", e.to_string()))?;

        let root = non_empty(raw.test_root_path)
            .unwrap_or_else(|| DEFAULT_TEST_ROOT_PATH.to_owned());

        let raw_servers = raw
            .servers
            .ok_or_else(|| DescriptorError::missing("servers"))?;
        if raw_servers.is_empty() {
            return Err(DescriptorError::malformed(
                "servers",
                "at least one server role is required",
            ));
        }

        let servers = raw_servers
            .into_iter()
            .enumerate()
            .map(|(i, server)| convert_server(i, server, &root))
            .collect::<Result<Vec<_>, _>>()?;

        let raw_client = raw
            .test_config
            .ok_or_else(|| DescriptorError::missing("test_config"))?;
        let client = convert_client(raw_client, &servers, &root)?;

        Ok(Self {
            name: raw.name.unwrap_or_default(),
            description: raw.description.unwrap_or_default(),
            version: raw.version.unwrap_or_default(),
            default_container_version: non_empty(raw.default_version)
                .unwrap_or_else(|| DEFAULT_CONTAINER_VERSION.to_owned()),
            test_root_path: root,
            servers,
            client,
        })
    }

    /// 파일에서 디스크립터를 로드합니다.
    ///
    /// 시나리오에 `name`이 없으면 파일 이름(확장자 제외)을 사용합니다.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, XrdtestError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let mut descriptor = Self::load(&bytes)?;
        if descriptor.name.is_empty() {
            descriptor.name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        Ok(descriptor)
    }

    /// 프로비저닝 대상 역할 수
    pub fn provisioned_role_count(&self) -> usize {
        self.servers.iter().filter(|s| !s.is_reference_only()).count()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn parse_endpoint(uri: &str, field: &str) -> Result<ConnectionEndpoint, DescriptorError> {
    uri.parse::<ConnectionEndpoint>()
        .map_err(|reason| DescriptorError::malformed(field, reason))
}

fn convert_server(index: usize, raw: RawServer, root: &str) -> Result<ServerRole, DescriptorError> {
    let prefix = format!("servers[{index}]");

    let uri = raw
        .uri
        .ok_or_else(|| DescriptorError::missing(format!("{prefix}.uri")))?;
    let endpoint = parse_endpoint(&uri, &format!("{prefix}.uri"))?;

    let host_identity = raw
        .server
        .filter(|s| !s.is_empty())
        .ok_or_else(|| DescriptorError::missing(format!("{prefix}.server")))?;

    let kind = match raw.role.as_deref() {
        None => RoleKind::default(),
        Some(value) => RoleKind::parse(value).ok_or_else(|| {
            DescriptorError::malformed(
                format!("{prefix}.role"),
                format!("unknown role '{value}' (expected manager, server, https-server, token-server)"),
            )
        })?,
    };

    let provisioning = match raw.server_config {
        None => None,
        Some(config) => Some(Provisioning {
            entrypoint: config
                .entrypoint
                .unwrap_or_default()
                .iter()
                .map(|arg| substitute_root(arg, root))
                .collect(),
            mounts: convert_mounts(
                config.volumes.unwrap_or_default(),
                &format!("{prefix}.server_config.volumes"),
                root,
            )?,
            container_version: non_empty(raw.version),
        }),
    };

    Ok(ServerRole {
        endpoint,
        host_identity,
        awaited_port: raw.port,
        kind,
        provisioning,
    })
}

fn convert_client(
    raw: RawClient,
    servers: &[ServerRole],
    root: &str,
) -> Result<ClientSpec, DescriptorError> {
    // uri가 없으면 첫 번째 서버의 런타임에서 실행
    let endpoint = match raw.uri {
        Some(uri) => parse_endpoint(&uri, "test_config.uri")?,
        None => servers
            .first()
            .map(|s| s.endpoint.clone())
            .ok_or_else(|| DescriptorError::missing("test_config.uri"))?,
    };

    let command: Vec<String> = raw
        .test_command
        .ok_or_else(|| DescriptorError::missing("test_config.test_command"))?
        .iter()
        .map(|arg| substitute_root(arg, root))
        .collect();
    if command.is_empty() {
        return Err(DescriptorError::malformed(
            "test_config.test_command",
            "test command must not be empty",
        ));
    }

    let mounts = convert_mounts(
        raw.test_volumes.unwrap_or_default(),
        "test_config.test_volumes",
        root,
    )?;

    let artifact_paths = raw
        .artefact_paths
        .unwrap_or_default()
        .iter()
        .enumerate()
        .map(|(i, path)| {
            let resolved = substitute_root(path, root);
            if resolved.starts_with('/') {
                Ok(resolved)
            } else {
                Err(DescriptorError::malformed(
                    format!("test_config.artefact_paths[{i}]"),
                    format!("artifact path must be absolute, got '{resolved}'"),
                ))
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ClientSpec {
        endpoint,
        command,
        mounts,
        environment: raw.test_env.unwrap_or_default(),
        artifact_paths,
        container_version: non_empty(raw.version),
    })
}

fn convert_mounts(
    volumes: BTreeMap<String, RawVolume>,
    field: &str,
    root: &str,
) -> Result<Vec<Mount>, DescriptorError> {
    volumes
        .into_iter()
        .map(|(source, volume)| {
            let entry = format!("{field}.{source}");
            if source.is_empty() {
                return Err(DescriptorError::invalid_mount(
                    field,
                    "mount source must not be empty",
                ));
            }

            let target = volume
                .bind
                .filter(|b| !b.is_empty())
                .ok_or_else(|| {
                    DescriptorError::invalid_mount(format!("{entry}.bind"), "bind target is required")
                })?;

            let mode = match volume.mode.as_deref() {
                None | Some("rw") => MountMode::Rw,
                Some("ro") => MountMode::Ro,
                Some(other) => {
                    return Err(DescriptorError::invalid_mount(
                        format!("{entry}.mode"),
                        format!("mode must be 'ro' or 'rw', got '{other}'"),
                    ));
                }
            };

            Ok(Mount {
                source: substitute_root(&source, root),
                target: substitute_root(&target, root),
                mode,
            })
        })
        .collect()
}
