//! `xrdtest run` command handler
//!
//! Every scenario file is loaded, then run `--repeat` times. A failing run
//! never stops later ones; the first failure decides the exit code.

use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use xrdtest_core::{ScenarioDescriptor, XrdtestConfig};
use xrdtest_orchestrator::{
    BollardConnector, Connector, RunOutcome, RunReport, RunnerConfig, RunnerConfigBuilder,
    ScenarioRunner,
};

use crate::cli::RunArgs;
use crate::commands::collect_scenarios;
use crate::error::{CliError, describe_cause};
use crate::output::{OutputWriter, Render};

/// Execute the `run` command.
pub async fn execute(
    args: RunArgs,
    config: &XrdtestConfig,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let runner_config = build_runner_config(&args, config)?;
    let scenarios = collect_scenarios(&args.path)?;

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let runner = ScenarioRunner::new(
        Arc::new(BollardConnector::new(&runner_config)),
        Arc::new(runner_config),
    );

    let summary = run_scenarios(&runner, &scenarios, &cancel, |entry| writer.render(entry)).await?;
    writer.render(&summary)?;

    summary.into_result()
}

/// Merge the configured runner settings with this invocation's flags.
pub fn build_runner_config(
    args: &RunArgs,
    config: &XrdtestConfig,
) -> Result<RunnerConfig, CliError> {
    let mut builder = RunnerConfigBuilder::from_core(&config.runner)
        .repeat(args.repeat)
        .sleep_after_servers(Duration::from_secs(args.sleep_after_servers));

    if let Some(image) = &args.container_version {
        builder = builder.container_version(image);
    }
    if let Some(image) = &args.server_version {
        builder = builder.server_version(image);
    }
    if let Some(image) = &args.test_version {
        builder = builder.test_version(image);
    }
    if let Some(secs) = args.client_timeout {
        builder = builder.client_timeout(Duration::from_secs(secs));
    }
    for (key, value) in &args.test_env {
        builder = builder.extra_env(key, value);
    }

    builder.build().map_err(|e| CliError::Config(e.to_string()))
}

/// Cancel the token on the first Ctrl-C and exit with 130 on the second.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if handle_interrupts(tokio::signal::ctrl_c, &cancel).await {
            std::process::exit(CliError::Cancelled.exit_code());
        }
    });
}

/// Drive `cancel` from a source of interrupt signals.
///
/// The first signal cancels the token so the active run still goes through
/// cleanup. Returns `true` once a second signal arrives, meaning the caller
/// should stop waiting for cleanup and exit.
pub async fn handle_interrupts<F, Fut>(mut next_signal: F, cancel: &CancellationToken) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = next_signal().await {
        error!(error = %e, "failed to listen for interrupt");
        return false;
    }
    warn!("interrupt received, cancelling and cleaning up (press Ctrl-C again to exit now)");
    cancel.cancel();

    match next_signal().await {
        Ok(()) => {
            warn!("second interrupt received, exiting without finishing cleanup");
            true
        }
        Err(e) => {
            error!(error = %e, "failed to listen for interrupt");
            false
        }
    }
}

/// Run every scenario `repeat` times and collect the outcome of each run.
///
/// `on_entry` is called as soon as a run finishes so progress is visible
/// while later scenarios are still running.
pub async fn run_scenarios<C, F>(
    runner: &ScenarioRunner<C>,
    scenarios: &[PathBuf],
    cancel: &CancellationToken,
    mut on_entry: F,
) -> Result<RunSummary, CliError>
where
    C: Connector,
    F: FnMut(&RunEntry) -> Result<(), CliError>,
{
    let repeat = runner.config().repeat;
    let mut summary = RunSummary::default();

    for path in scenarios {
        if cancel.is_cancelled() {
            summary.skip();
            continue;
        }

        let descriptor = match ScenarioDescriptor::from_file(path).await {
            Ok(descriptor) => descriptor,
            Err(e) => {
                error!(file = %path.display(), error = %e, "invalid scenario, skipping");
                let failure = CliError::Descriptor {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                };
                let entry = RunEntry::invalid(path, &failure);
                on_entry(&entry)?;
                summary.record(&entry, Some(failure));
                continue;
            }
        };

        for iteration in 1..=repeat {
            if cancel.is_cancelled() {
                summary.skip();
                continue;
            }

            info!(
                scenario = %descriptor.name,
                file = %path.display(),
                iteration,
                repeat,
                "starting run"
            );
            let report = runner.run(&descriptor, cancel.child_token()).await;
            let failure = CliError::from_run_result(&descriptor.name, &report.result);
            let entry = RunEntry::completed(path, iteration, repeat, report, failure.as_ref());
            on_entry(&entry)?;
            summary.record(&entry, failure);
        }
    }

    Ok(summary)
}

/// Result of one scenario run (or of a scenario that could not be loaded).
#[derive(Debug, Serialize)]
pub struct RunEntry {
    pub file: String,
    pub iteration: u32,
    pub repeat: u32,
    pub exit_code: i32,
    #[serde(flatten)]
    pub detail: RunDetail,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunDetail {
    /// The descriptor was rejected before any host was contacted.
    Invalid { error: String },
    /// The run went through provisioning (or part of it) and cleanup.
    Completed {
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        report: Box<RunReport>,
    },
}

impl RunEntry {
    fn invalid(path: &Path, failure: &CliError) -> Self {
        Self {
            file: path.display().to_string(),
            iteration: 0,
            repeat: 0,
            exit_code: failure.exit_code(),
            detail: RunDetail::Invalid {
                error: failure.to_string(),
            },
        }
    }

    fn completed(
        path: &Path,
        iteration: u32,
        repeat: u32,
        report: RunReport,
        failure: Option<&CliError>,
    ) -> Self {
        Self {
            file: path.display().to_string(),
            iteration,
            repeat,
            exit_code: failure.map_or(0, CliError::exit_code),
            detail: RunDetail::Completed {
                error: failure.map(ToString::to_string),
                report: Box::new(report),
            },
        }
    }
}

impl Render for RunEntry {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        let report = match &self.detail {
            RunDetail::Invalid { error } => {
                writeln!(w, "Scenario: {}", self.file.bold())?;
                writeln!(w, "  Result: {}", "INVALID".red().bold())?;
                writeln!(w, "  Error: {}", error.red())?;
                writeln!(w)?;
                return Ok(());
            }
            RunDetail::Completed { report, .. } => report,
        };

        writeln!(
            w,
            "Scenario: {} ({}) [run {}/{}]",
            report.scenario.bold(),
            self.file,
            self.iteration,
            self.repeat
        )?;
        writeln!(w, "  Run ID: {}", report.run_id)?;

        let outcome = report.result.outcome.as_str().to_uppercase();
        let outcome = match report.result.outcome {
            RunOutcome::Success => outcome.green().bold(),
            RunOutcome::Cancelled => outcome.yellow().bold(),
            RunOutcome::ProvisionFailure | RunOutcome::ClientFailure => outcome.red().bold(),
        };
        writeln!(w, "  Result: {} (exit code {})", outcome, self.exit_code)?;

        if let Some(role) = &report.result.failing_role {
            writeln!(w, "  Failing role: {}", role)?;
        }
        if report.result.cause.is_some() {
            writeln!(w, "  Cause: {}", describe_cause(report.result.cause.as_ref()))?;
        }
        if let Some(code) = report.result.client_exit_code {
            writeln!(w, "  Client exit code: {}", code)?;
        }

        writeln!(w, "  Containers: {}", report.provisioned.len())?;
        for container in &report.provisioned {
            writeln!(w, "    {} {} ({})", container.role, container.name, container.image)?;
        }

        if let Some(speed) = report.transfer_speed_mbps {
            writeln!(w, "  Transfer speed: {:.2} MB/s", speed)?;
        }
        writeln!(w, "  Duration: {:.1}s", report.duration_secs)?;

        let cleanup = &report.cleanup;
        if cleanup.is_clean() {
            writeln!(
                w,
                "  Cleanup: {} ({} containers, {} artifacts)",
                "clean".green(),
                cleanup.containers_removed.len(),
                cleanup.artifacts_removed.len()
            )?;
        } else {
            writeln!(
                w,
                "  Cleanup: {}",
                format!("{} errors", cleanup.errors.len()).yellow()
            )?;
            for e in &cleanup.errors {
                writeln!(w, "    {}", e.to_string().yellow())?;
            }
        }

        if report.result.outcome == RunOutcome::ClientFailure {
            if let Some(output) = &report.client_output {
                writeln!(w, "  Client output:")?;
                for line in output.lines() {
                    writeln!(w, "    {}", line)?;
                }
            }
        }

        writeln!(w)?;
        Ok(())
    }
}

/// Totals over all runs of one invocation.
#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Runs not started because of cancellation
    pub skipped: usize,
    pub cancelled: bool,
    pub exit_code: i32,
    #[serde(skip)]
    first_failure: Option<CliError>,
}

impl RunSummary {
    fn record(&mut self, entry: &RunEntry, failure: Option<CliError>) {
        self.total += 1;
        match failure {
            None => self.succeeded += 1,
            Some(failure) => {
                self.failed += 1;
                if self.first_failure.is_none() {
                    self.exit_code = entry.exit_code;
                    self.first_failure = Some(failure);
                }
            }
        }
    }

    /// Count a run that was not started because the invocation was cancelled.
    fn skip(&mut self) {
        self.skipped += 1;
        self.cancelled = true;
        if self.first_failure.is_none() {
            self.exit_code = CliError::Cancelled.exit_code();
        }
    }

    /// First failure of the invocation, if any.
    pub fn first_failure(&self) -> Option<&CliError> {
        self.first_failure.as_ref()
    }

    /// Convert into the command result: `Ok` only when every run succeeded
    /// and none was skipped.
    pub fn into_result(self) -> Result<(), CliError> {
        match self.first_failure {
            None if self.cancelled => Err(CliError::Cancelled),
            None => Ok(()),
            Some(first) if self.total == 1 => Err(first),
            Some(first) => Err(CliError::RunsFailed {
                failed: self.failed,
                total: self.total,
                first: Box::new(first),
            }),
        }
    }
}

impl Render for RunSummary {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        let failed = if self.failed > 0 {
            self.failed.to_string().red()
        } else {
            self.failed.to_string().normal()
        };
        write!(
            w,
            "Runs: {}  Succeeded: {}  Failed: {}",
            self.total,
            self.succeeded.to_string().green(),
            failed
        )?;
        if self.skipped > 0 {
            write!(w, "  Skipped: {}", self.skipped.to_string().yellow())?;
        }
        writeln!(w)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn args(path: &str) -> RunArgs {
        RunArgs {
            path: PathBuf::from(path),
            container_version: None,
            server_version: None,
            test_version: None,
            repeat: 1,
            sleep_after_servers: 0,
            test_env: Vec::new(),
            client_timeout: None,
        }
    }

    fn runner() -> ScenarioRunner<BollardConnector> {
        let config = RunnerConfig::default();
        ScenarioRunner::new(Arc::new(BollardConnector::new(&config)), Arc::new(config))
    }

    #[test]
    fn test_build_runner_config_applies_flags() {
        let mut args = args("s.json");
        args.container_version = Some("xrootd:5.6".to_owned());
        args.server_version = Some("xrootd:5.7".to_owned());
        args.test_version = Some("client:2".to_owned());
        args.repeat = 2;
        args.sleep_after_servers = 3;
        args.client_timeout = Some(90);
        args.test_env = vec![("XRD_DEBUG".to_owned(), "1".to_owned())];

        let config = build_runner_config(&args, &XrdtestConfig::default()).expect("should build");

        assert_eq!(config.container_version.as_deref(), Some("xrootd:5.6"));
        assert_eq!(config.server_version.as_deref(), Some("xrootd:5.7"));
        assert_eq!(config.test_version.as_deref(), Some("client:2"));
        assert_eq!(config.repeat, 2);
        assert_eq!(config.sleep_after_servers, Duration::from_secs(3));
        assert_eq!(config.client_timeout, Duration::from_secs(90));
        assert_eq!(config.extra_env.get("XRD_DEBUG").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_build_runner_config_keeps_configured_timeout() {
        let mut config = XrdtestConfig::default();
        config.runner.client_timeout_secs = 120;
        let runner_config = build_runner_config(&args("s.json"), &config).expect("should build");
        assert_eq!(runner_config.client_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_build_runner_config_rejects_zero_repeat() {
        let mut args = args("s.json");
        args.repeat = 0;
        let err = build_runner_config(&args, &XrdtestConfig::default()).expect_err("should fail");
        assert_eq!(err.exit_code(), 3);
    }

    #[tokio::test]
    async fn test_invalid_descriptors_are_reported_and_later_files_continue() {
        // Given: two broken scenarios, processed in order
        let dir = TempDir::new().expect("should create temp dir");
        let first = dir.path().join("a.json");
        let second = dir.path().join("b.json");
        fs::write(&first, "{ broken").expect("write");
        fs::write(&second, r#"{"servers": []}"#).expect("write");

        // When
        let mut seen = Vec::new();
        let summary = run_scenarios(
            &runner(),
            &[first.clone(), second.clone()],
            &CancellationToken::new(),
            |entry| {
                seen.push(entry.file.clone());
                Ok(())
            },
        )
        .await
        .expect("should run");

        // Then: both were visited, exit code 3 from the first
        assert_eq!(seen, vec![first.display().to_string(), second.display().to_string()]);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.exit_code, 3);
        let err = summary.into_result().expect_err("should fail");
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().contains("2 of 2 runs failed"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_skips_everything() {
        let dir = TempDir::new().expect("should create temp dir");
        let file = dir.path().join("a.json");
        fs::write(&file, "{}").expect("write");

        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = run_scenarios(&runner(), &[file], &cancel, |_| Ok(()))
            .await
            .expect("should run");
        assert_eq!(summary.total, 0);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.exit_code, 130);
        let err = summary.into_result().expect_err("cancelled invocation should fail");
        assert!(matches!(err, CliError::Cancelled));
        assert_eq!(err.exit_code(), 130);
    }

    #[test]
    fn test_summary_keeps_first_failure_over_later_cancellation() {
        let mut summary = RunSummary::default();
        let failure = CliError::Descriptor {
            path: "a.json".to_owned(),
            reason: "bad".to_owned(),
        };
        let entry = RunEntry::invalid(Path::new("a.json"), &failure);
        summary.record(&entry, Some(failure));
        summary.skip();

        assert_eq!(summary.exit_code, 3);
        let err = summary.into_result().expect_err("should fail");
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_summary_without_runs_or_cancellation_is_ok() {
        assert!(RunSummary::default().into_result().is_ok());
    }

    type Signal = std::pin::Pin<Box<dyn Future<Output = std::io::Result<()>>>>;

    /// Interrupt source that replays `script`, then never fires again.
    fn scripted(script: Vec<std::io::Result<()>>) -> impl FnMut() -> Signal {
        let mut script = std::collections::VecDeque::from(script);
        move || {
            let next = script.pop_front();
            let signal: Signal = Box::pin(async move {
                match next {
                    Some(result) => result,
                    None => std::future::pending().await,
                }
            });
            signal
        }
    }

    #[tokio::test]
    async fn test_second_interrupt_forces_exit() {
        let cancel = CancellationToken::new();
        let forced = handle_interrupts(scripted(vec![Ok(()), Ok(())]), &cancel).await;
        assert!(forced);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_interrupt_only_cancels() {
        let cancel = CancellationToken::new();
        let waiting = tokio::time::timeout(
            Duration::from_secs(5),
            handle_interrupts(scripted(vec![Ok(())]), &cancel),
        )
        .await;
        assert!(waiting.is_err(), "should keep waiting for a second interrupt");
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_listener_failure_does_not_cancel() {
        let cancel = CancellationToken::new();
        let failure = std::io::Error::other("no signal handler");
        let forced = handle_interrupts(scripted(vec![Err(failure)]), &cancel).await;
        assert!(!forced);
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn test_invalid_entry_serializes_status() {
        let failure = CliError::Descriptor {
            path: "x.json".to_owned(),
            reason: "missing field 'servers'".to_owned(),
        };
        let entry = RunEntry::invalid(Path::new("x.json"), &failure);
        let json = serde_json::to_value(&entry).expect("should serialize");
        assert_eq!(json["status"], "invalid");
        assert_eq!(json["exit_code"], 3);
        assert!(json["error"].as_str().is_some_and(|e| e.contains("servers")));
    }

    #[test]
    fn test_summary_single_failure_is_returned_unwrapped() {
        let mut summary = RunSummary::default();
        let failure = CliError::Cancelled;
        let entry = RunEntry::invalid(Path::new("x.json"), &failure);
        summary.record(&entry, Some(failure));
        let err = summary.into_result().expect_err("should fail");
        assert!(matches!(err, CliError::Cancelled));
        assert_eq!(err.exit_code(), 130);
    }
}
