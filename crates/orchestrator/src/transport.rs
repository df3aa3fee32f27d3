//! ssh 소켓 포워딩
//!
//! 원격 런타임 소켓을 `ssh -L local.sock:remote.sock`으로 로컬 유닉스 소켓에
//! 연결합니다. 로컬 소켓은 터널마다 만드는 임시 디렉토리에 생기며,
//! 터널이 drop되면 ssh 프로세스와 디렉토리가 함께 정리됩니다.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::{ConnectionError, ConnectionErrorKind};

/// 소켓 생성 여부를 확인하는 간격
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// 원격 런타임 소켓으로의 ssh 터널
pub struct SshTunnel {
    child: Child,
    local_socket: PathBuf,
    // drop 시 디렉토리 삭제
    _dir: tempfile::TempDir,
}

/// 터널 대상
#[derive(Debug, Clone)]
pub struct TunnelTarget<'a> {
    pub user: &'a str,
    pub host: &'a str,
    pub port: u16,
    pub remote_socket: &'a str,
}

impl SshTunnel {
    /// ssh 프로세스를 띄우고 로컬 소켓이 생길 때까지 기다립니다.
    ///
    /// # Errors
    ///
    /// - `AuthFailed`: ssh가 인증 거부로 종료됨
    /// - `Unreachable`: ssh가 다른 이유로 종료되었거나 실행할 수 없음
    /// - `Timeout`: `timeout` 안에 소켓이 생기지 않음
    pub async fn open(
        ssh_binary: &str,
        target: &TunnelTarget<'_>,
        timeout: Duration,
    ) -> Result<Self, ConnectionError> {
        let endpoint = format!(
            "ssh://{}@{}:{}{}",
            target.user, target.host, target.port, target.remote_socket
        );

        let dir = tempfile::Builder::new()
            .prefix("xrdtest-ssh-")
            .tempdir()
            .map_err(|e| {
                ConnectionError::new(
                    ConnectionErrorKind::Unreachable,
                    &endpoint,
                    format!("failed to create socket directory: {e}"),
                )
            })?;
        let local_socket = dir.path().join("runtime.sock");

        let mut child = Command::new(ssh_binary)
            .args(tunnel_args(target, &local_socket))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ConnectionError::new(
                    ConnectionErrorKind::Unreachable,
                    &endpoint,
                    format!("failed to spawn '{ssh_binary}': {e}"),
                )
            })?;

        debug!(endpoint = %endpoint, socket = %local_socket.display(), "waiting for ssh forward");

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::fs::try_exists(&local_socket).await.unwrap_or(false) {
                return Ok(Self {
                    child,
                    local_socket,
                    _dir: dir,
                });
            }

            let exited = child.try_wait().map_err(|e| {
                ConnectionError::new(ConnectionErrorKind::Unreachable, &endpoint, e.to_string())
            })?;
            if let Some(status) = exited {
                let stderr = read_stderr(&mut child).await;
                return Err(classify_exit(&endpoint, &status.to_string(), &stderr));
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(ConnectionError::new(
                    ConnectionErrorKind::Timeout,
                    &endpoint,
                    format!("ssh forward not ready after {}s", timeout.as_secs()),
                ));
            }
            tokio::time::sleep(SOCKET_POLL_INTERVAL).await;
        }
    }

    /// 포워딩된 로컬 소켓 경로
    pub fn local_socket(&self) -> &Path {
        &self.local_socket
    }

    /// ssh 프로세스를 종료합니다.
    pub async fn close(mut self) -> std::io::Result<()> {
        match self.child.kill().await {
            Ok(()) => Ok(()),
            // 이미 종료된 프로세스
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => {
                warn!(socket = %self.local_socket.display(), error = %e, "failed to stop ssh forward");
                Err(e)
            }
        }
    }
}

fn tunnel_args(target: &TunnelTarget<'_>, local_socket: &Path) -> Vec<String> {
    vec![
        "-nNT".to_owned(),
        "-o".to_owned(),
        "BatchMode=yes".to_owned(),
        "-o".to_owned(),
        "ExitOnForwardFailure=yes".to_owned(),
        "-o".to_owned(),
        "StreamLocalBindUnlink=yes".to_owned(),
        "-p".to_owned(),
        target.port.to_string(),
        "-L".to_owned(),
        format!("{}:{}", local_socket.display(), target.remote_socket),
        format!("{}@{}", target.user, target.host),
    ]
}

async fn read_stderr(child: &mut Child) -> String {
    let mut buf = String::new();
    if let Some(mut stderr) = child.stderr.take() {
        let _ = stderr.read_to_string(&mut buf).await;
    }
    buf
}

fn classify_exit(endpoint: &str, status: &str, stderr: &str) -> ConnectionError {
    let reason = match stderr.trim() {
        "" => format!("ssh exited ({status})"),
        msg => format!("ssh exited ({status}): {msg}"),
    };
    let kind = if stderr.contains("Permission denied") || stderr.contains("Host key verification failed") {
        ConnectionErrorKind::AuthFailed
    } else {
        ConnectionErrorKind::Unreachable
    };
    ConnectionError::new(kind, endpoint, reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> TunnelTarget<'static> {
        TunnelTarget {
            user: "xrootd",
            host: "xrd2.example.org",
            port: 2222,
            remote_socket: "/run/podman/podman.sock",
        }
    }

    #[test]
    fn builds_forward_arguments() {
        let args = tunnel_args(&target(), Path::new("/tmp/x/runtime.sock"));
        assert!(args.contains(&"BatchMode=yes".to_owned()));
        assert!(args.windows(2).any(|w| w[0] == "-p" && w[1] == "2222"));
        assert!(args.contains(&"/tmp/x/runtime.sock:/run/podman/podman.sock".to_owned()));
        assert_eq!(args.last().map(String::as_str), Some("xrootd@xrd2.example.org"));
    }

    #[test]
    fn permission_denied_is_auth_failure() {
        let err = classify_exit(
            "ssh://xrootd@xrd2:22/run/p.sock",
            "exit status: 255",
            "xrootd@xrd2: Permission denied (publickey).",
        );
        assert_eq!(err.kind, ConnectionErrorKind::AuthFailed);
    }

    #[test]
    fn other_exit_is_unreachable() {
        let err = classify_exit(
            "ssh://xrootd@xrd2:22/run/p.sock",
            "exit status: 255",
            "ssh: connect to host xrd2 port 22: Connection refused",
        );
        assert_eq!(err.kind, ConnectionErrorKind::Unreachable);
        assert!(err.reason.contains("Connection refused"));
    }

    #[tokio::test]
    async fn missing_ssh_binary_is_unreachable() {
        let err = SshTunnel::open(
            "/nonexistent/xrdtest-ssh",
            &target(),
            Duration::from_millis(200),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.kind, ConnectionErrorKind::Unreachable);
    }

    #[tokio::test]
    async fn process_exit_before_socket_is_reported() {
        // `false`는 즉시 실패로 종료
        let err = SshTunnel::open("false", &target(), Duration::from_secs(5))
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind, ConnectionErrorKind::Unreachable);
    }
}
