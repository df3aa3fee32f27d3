//! CLI-specific error types and exit code mapping

use xrdtest_core::error::XrdtestError;
use xrdtest_orchestrator::{FailureCause, RunOutcome, RunResult};

/// CLI-specific error type.
///
/// Each variant carries enough context for a user-friendly message.
/// The `exit_code()` method maps errors to the runner's documented exit codes.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration loading or validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// Bad command-line argument that clap could not reject by itself.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Scenario descriptor could not be read or failed validation.
    #[error("invalid scenario {path}: {reason}")]
    Descriptor { path: String, reason: String },

    /// The test client ran and failed.
    #[error("scenario '{scenario}': test client failed: {reason}")]
    ClientFailed { scenario: String, reason: String },

    /// A role (or the client container) could not be provisioned.
    #[error("scenario '{scenario}': provisioning of {role} failed: {reason}")]
    Provision {
        scenario: String,
        role: String,
        reason: String,
    },

    /// A runtime daemon could not be reached.
    #[error("scenario '{scenario}': cannot reach {endpoint}: {reason}")]
    Connection {
        scenario: String,
        endpoint: String,
        reason: String,
    },

    /// Interrupted by the user.
    #[error("cancelled")]
    Cancelled,

    /// Several runs where at least one failed; carries the first failure.
    #[error("{failed} of {total} runs failed; first failure: {first}")]
    RunsFailed {
        failed: usize,
        total: usize,
        first: Box<CliError>,
    },

    /// JSON serialisation failed during output rendering.
    #[error("json output error: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    /// IO error (file read, stdout write, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped domain error from xrdtest-core.
    #[error("{0}")]
    Core(#[from] XrdtestError),
}

impl CliError {
    /// Map the error to a process exit code.
    ///
    /// | Code | Meaning                                        |
    /// |------|------------------------------------------------|
    /// | 0    | Success                                        |
    /// | 1    | Test client failed / general error             |
    /// | 2    | Provisioning failure                           |
    /// | 3    | Invalid descriptor, configuration or argument  |
    /// | 4    | Runtime daemon unreachable                     |
    /// | 130  | Cancelled (Ctrl-C)                             |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::InvalidArgument(_) | Self::Descriptor { .. } => 3,
            Self::Provision { .. } => 2,
            Self::Connection { .. } => 4,
            Self::Cancelled => 130,
            Self::RunsFailed { first, .. } => first.exit_code(),
            Self::Core(e) => match e {
                XrdtestError::Config(_) | XrdtestError::Descriptor(_) => 3,
                XrdtestError::Provision(_) => 2,
                XrdtestError::Connection(_) => 4,
                XrdtestError::Runtime(_) | XrdtestError::Io(_) => 1,
            },
            Self::ClientFailed { .. } | Self::JsonSerialize(_) | Self::Io(_) => 1,
        }
    }

    /// Classify a finished run. Returns `None` for a successful run.
    ///
    /// Cleanup problems are reported separately and never produce an error here.
    pub fn from_run_result(scenario: &str, result: &RunResult) -> Option<Self> {
        let scenario = scenario.to_owned();
        let role = || {
            result
                .failing_role
                .clone()
                .unwrap_or_else(|| "unknown role".to_owned())
        };

        match result.outcome {
            RunOutcome::Success => None,
            RunOutcome::Cancelled => Some(Self::Cancelled),
            RunOutcome::ProvisionFailure => Some(match &result.cause {
                Some(FailureCause::Connection {
                    endpoint, reason, ..
                }) => Self::Connection {
                    scenario,
                    endpoint: endpoint.clone(),
                    reason: reason.clone(),
                },
                Some(FailureCause::Provision { reason, .. }) => Self::Provision {
                    scenario,
                    role: role(),
                    reason: reason.clone(),
                },
                other => Self::Provision {
                    scenario,
                    role: role(),
                    reason: describe_cause(other.as_ref()),
                },
            }),
            RunOutcome::ClientFailure => Some(Self::ClientFailed {
                scenario,
                reason: describe_cause(result.cause.as_ref()),
            }),
        }
    }
}

/// One-line human description of a failure cause.
pub fn describe_cause(cause: Option<&FailureCause>) -> String {
    match cause {
        None => "unknown failure".to_owned(),
        Some(FailureCause::Connection {
            kind,
            endpoint,
            reason,
        }) => format!("{endpoint} {kind}: {reason}"),
        Some(FailureCause::Provision { kind, reason }) => format!("{kind}: {reason}"),
        Some(FailureCause::ClientExit { code }) => format!("exited with code {code}"),
        Some(FailureCause::ClientTimeout { after_secs }) => {
            format!("timed out after {after_secs}s")
        }
        Some(FailureCause::ClientRuntime { reason }) => reason.clone(),
        Some(FailureCause::Cancelled) => "cancelled".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xrdtest_core::error::{ConfigError, DescriptorError};
    use xrdtest_orchestrator::{ConnectionErrorKind, ProvisionErrorKind};

    fn result(outcome: RunOutcome, role: Option<&str>, cause: Option<FailureCause>) -> RunResult {
        RunResult {
            outcome,
            client_exit_code: match &cause {
                Some(FailureCause::ClientExit { code }) => Some(*code),
                None => Some(0),
                _ => None,
            },
            failing_role: role.map(str::to_owned),
            cause,
        }
    }

    #[test]
    fn test_exit_code_config_error() {
        let err = CliError::Config("bad value".to_owned());
        assert_eq!(err.exit_code(), 3, "config error should return exit code 3");
    }

    #[test]
    fn test_exit_code_descriptor_error() {
        let err = CliError::Descriptor {
            path: "s.json".to_owned(),
            reason: "missing field".to_owned(),
        };
        assert_eq!(err.exit_code(), 3, "descriptor error should return exit code 3");
    }

    #[test]
    fn test_exit_code_cancelled() {
        assert_eq!(CliError::Cancelled.exit_code(), 130);
    }

    #[test]
    fn test_exit_code_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        assert_eq!(CliError::Io(io_err).exit_code(), 1);
    }

    #[test]
    fn test_exit_code_core_errors() {
        let descriptor: XrdtestError = DescriptorError::missing("servers").into();
        assert_eq!(CliError::Core(descriptor).exit_code(), 3);

        let config: XrdtestError = ConfigError::ParseFailed {
            reason: "bad toml".to_owned(),
        }
        .into();
        assert_eq!(CliError::Core(config).exit_code(), 3);

        let conn = XrdtestError::Connection("refused".to_owned());
        assert_eq!(CliError::Core(conn).exit_code(), 4);

        let prov = XrdtestError::Provision("create failed".to_owned());
        assert_eq!(CliError::Core(prov).exit_code(), 2);
    }

    #[test]
    fn test_run_success_is_not_an_error() {
        let ok = result(RunOutcome::Success, None, None);
        assert!(CliError::from_run_result("s", &ok).is_none());
    }

    #[test]
    fn test_run_client_failure_maps_to_1() {
        let r = result(
            RunOutcome::ClientFailure,
            None,
            Some(FailureCause::ClientExit { code: 54 }),
        );
        let err = CliError::from_run_result("copy", &r).expect("should be an error");
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("exited with code 54"));
    }

    #[test]
    fn test_run_client_timeout_maps_to_1() {
        let r = result(
            RunOutcome::ClientFailure,
            None,
            Some(FailureCause::ClientTimeout { after_secs: 60 }),
        );
        let err = CliError::from_run_result("copy", &r).expect("should be an error");
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("timed out after 60s"));
    }

    #[test]
    fn test_run_provision_failure_maps_to_2() {
        let r = result(
            RunOutcome::ProvisionFailure,
            Some("server[1]@host2"),
            Some(FailureCause::Provision {
                kind: ProvisionErrorKind::StartFailed,
                reason: "port in use".to_owned(),
            }),
        );
        let err = CliError::from_run_result("copy", &r).expect("should be an error");
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("server[1]@host2"));
    }

    #[test]
    fn test_run_connection_failure_maps_to_4() {
        let r = result(
            RunOutcome::ProvisionFailure,
            Some("server[0]@host1"),
            Some(FailureCause::Connection {
                kind: ConnectionErrorKind::Unreachable,
                endpoint: "ssh://root@host1:22/var/run/docker.sock".to_owned(),
                reason: "connection refused".to_owned(),
            }),
        );
        let err = CliError::from_run_result("copy", &r).expect("should be an error");
        assert_eq!(err.exit_code(), 4);
        assert!(err.to_string().contains("host1"));
    }

    #[test]
    fn test_run_cancelled_maps_to_130() {
        let r = result(RunOutcome::Cancelled, None, Some(FailureCause::Cancelled));
        let err = CliError::from_run_result("copy", &r).expect("should be an error");
        assert_eq!(err.exit_code(), 130);
    }

    #[test]
    fn test_runs_failed_uses_first_failure_code() {
        let err = CliError::RunsFailed {
            failed: 2,
            total: 5,
            first: Box::new(CliError::Provision {
                scenario: "a".to_owned(),
                role: "server[0]@h".to_owned(),
                reason: "x".to_owned(),
            }),
        };
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("2 of 5 runs failed"));
    }
}
