//! 런타임 엔드포인트: `unix://` / `ssh://` URI 파싱
//!
//! 두 엔드포인트는 모든 필드가 같을 때만 동등하며, 이 동등성이
//! 연결 관리자의 중복 제거 키가 됩니다.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// 원격 URI에 포트가 없을 때 사용하는 ssh 포트
pub const DEFAULT_SSH_PORT: u16 = 22;

/// 컨테이너 런타임 데몬에 도달하는 방법
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum ConnectionEndpoint {
    /// 로컬 유닉스 소켓
    Local {
        /// 런타임 소켓 경로
        socket_path: String,
    },
    /// ssh 세션을 통해 포워딩되는 원격 소켓
    Remote {
        /// ssh 사용자
        transport_user: String,
        /// ssh 호스트
        transport_host: String,
        /// ssh 포트
        transport_port: u16,
        /// 원격 호스트의 런타임 소켓 경로
        socket_path: String,
    },
}

impl ConnectionEndpoint {
    /// 메트릭/로그용 전송 방식 이름
    pub fn transport_name(&self) -> &'static str {
        match self {
            Self::Local { .. } => "local",
            Self::Remote { .. } => "remote",
        }
    }

    /// 런타임 소켓 경로 (로컬이든 원격이든)
    pub fn socket_path(&self) -> &str {
        match self {
            Self::Local { socket_path } | Self::Remote { socket_path, .. } => socket_path,
        }
    }
}

impl FromStr for ConnectionEndpoint {
    type Err = String;

    fn from_str(uri: &str) -> Result<Self, Self::Err> {
        if let Some(path) = uri.strip_prefix("unix://") {
            if !path.starts_with('/') {
                return Err(format!("unix socket path must be absolute, got '{path}'"));
            }
            return Ok(Self::Local {
                socket_path: path.to_owned(),
            });
        }

        let Some(rest) = uri.strip_prefix("ssh://") else {
            return Err(format!(
                "unsupported endpoint scheme in '{uri}' (expected unix:// or ssh://)"
            ));
        };

        let Some(slash) = rest.find('/') else {
            return Err("ssh endpoint is missing the remote socket path".to_owned());
        };
        let (authority, socket_path) = rest.split_at(slash);

        let Some((user, host_port)) = authority.rsplit_once('@') else {
            return Err("ssh endpoint must name a user (ssh://user@host:port/path)".to_owned());
        };
        if user.is_empty() {
            return Err("ssh user must not be empty".to_owned());
        }

        let (host, port) = split_host_port(host_port)?;
        if host.is_empty() {
            return Err("ssh host must not be empty".to_owned());
        }

        Ok(Self::Remote {
            transport_user: user.to_owned(),
            transport_host: host.to_owned(),
            transport_port: port,
            socket_path: socket_path.to_owned(),
        })
    }
}

fn split_host_port(host_port: &str) -> Result<(&str, u16), String> {
    // [::1]:22 형식의 IPv6 리터럴
    if let Some(bracketed) = host_port.strip_prefix('[') {
        let Some((host, tail)) = bracketed.split_once(']') else {
            return Err(format!("unterminated IPv6 literal in '{host_port}'"));
        };
        return match tail.strip_prefix(':') {
            Some(port) => Ok((host, parse_port(port)?)),
            None if tail.is_empty() => Ok((host, DEFAULT_SSH_PORT)),
            None => Err(format!("unexpected characters after host in '{host_port}'")),
        };
    }

    match host_port.rsplit_once(':') {
        Some((host, _)) if host.contains(':') => Err(format!(
            "IPv6 host in '{host_port}' must be written in brackets, e.g. [{host_port}]:22"
        )),
        Some((host, port)) => Ok((host, parse_port(port)?)),
        None => Ok((host_port, DEFAULT_SSH_PORT)),
    }
}

fn parse_port(port: &str) -> Result<u16, String> {
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(format!("invalid ssh port '{port}'")),
        Ok(p) => Ok(p),
    }
}

impl fmt::Display for ConnectionEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local { socket_path } => write!(f, "unix://{socket_path}"),
            Self::Remote {
                transport_user,
                transport_host,
                transport_port,
                socket_path,
            } => {
                if transport_host.contains(':') {
                    write!(
                        f,
                        "ssh://{transport_user}@[{transport_host}]:{transport_port}{socket_path}"
                    )
                } else {
                    write!(
                        f,
                        "ssh://{transport_user}@{transport_host}:{transport_port}{socket_path}"
                    )
                }
            }
        }
    }
}
