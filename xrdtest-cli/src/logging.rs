//! Logging initialization for the xrdtest binary.
//!
//! Configures `tracing-subscriber` from the `[general]` section of
//! `XrdtestConfig`, with `--log-level` / `--log-format` applied on top.
//! Log lines go to stderr so `--output json` on stdout stays parseable.

use anyhow::Result;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use xrdtest_core::config::GeneralConfig;

use crate::cli::LogFormat;

/// Apply command-line overrides to the configured logging settings.
pub fn effective_general(
    base: &GeneralConfig,
    log_level: Option<&str>,
    log_format: Option<LogFormat>,
) -> GeneralConfig {
    let mut general = base.clone();
    if let Some(level) = log_level {
        general.log_level = level.to_owned();
    }
    if let Some(format) = log_format {
        general.log_format = format.as_str().to_owned();
    }
    general
}

/// Initialize the global tracing subscriber.
///
/// Must be called exactly once, before any tracing macros are used.
/// `RUST_LOG` wins over the configured level.
///
/// # Formats
///
/// * `"json"` - Machine-parseable JSON lines
/// * `"pretty"` - Human-readable colored output (default)
pub fn init_tracing(config: &GeneralConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    match config.log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .try_init()
                .map_err(|e| {
                    anyhow::anyhow!("failed to initialize JSON tracing subscriber: {}", e)
                })?;
        }
        "pretty" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_writer(std::io::stderr),
                )
                .try_init()
                .map_err(|e| {
                    anyhow::anyhow!("failed to initialize pretty tracing subscriber: {}", e)
                })?;
        }
        _ => {
            return Err(anyhow::anyhow!(
                "unknown log format '{}', expected 'json' or 'pretty'",
                config.log_format
            ));
        }
    }

    Ok(())
}
