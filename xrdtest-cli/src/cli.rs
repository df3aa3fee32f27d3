//! CLI argument parsing using clap derive API
//!
//! This module defines the command-line interface structure using clap's derive macros.
//! It is purely declarative with no side effects or I/O.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Configuration path used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "xrdtest.toml";

/// xrdtest -- multi-host XRootD cluster test runner.
///
/// Use `xrdtest <COMMAND> --help` for subcommand details.
#[derive(Parser, Debug)]
#[command(name = "xrdtest", version, about, long_about = None)]
pub struct Cli {
    /// Path to the xrdtest.toml configuration file.
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Override log format.
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// Machine-readable JSON.
    Json,
}

/// Supported log formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// JSON lines.
    Json,
    /// Human-readable multi-line output.
    Pretty,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Pretty => "pretty",
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one scenario file or every scenario under a directory.
    Run(RunArgs),

    /// Validate scenario descriptors without contacting any host.
    Validate(ValidateArgs),

    /// Manage configuration.
    Config(ConfigArgs),
}

// ---- run ----

/// Provision the declared roles, run the test client, and clean up.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Scenario JSON file, or a directory searched recursively for `*.json`.
    pub path: PathBuf,

    /// Default image for every role and the client.
    #[arg(long)]
    pub container_version: Option<String>,

    /// Image for every server role (wins over per-role images).
    #[arg(long)]
    pub server_version: Option<String>,

    /// Image for the test client (wins over the scenario's client image).
    #[arg(long)]
    pub test_version: Option<String>,

    /// Run each scenario this many times.
    #[arg(long, default_value_t = 1)]
    pub repeat: u32,

    /// Seconds to wait after all servers are up, before starting the client.
    #[arg(long, default_value_t = 0)]
    pub sleep_after_servers: u64,

    /// Extra client environment variable (KEY=VALUE). May be repeated.
    #[arg(long = "test-env", value_parser = parse_key_val)]
    pub test_env: Vec<(String, String)>,

    /// Client timeout in seconds (overrides the configured value).
    #[arg(long)]
    pub client_timeout: Option<u64>,
}

/// Parse a `KEY=VALUE` pair.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{s}'"))?;
    if key.is_empty() {
        return Err(format!("invalid KEY=VALUE: empty key in '{s}'"));
    }
    Ok((key.to_owned(), value.to_owned()))
}

// ---- validate ----

/// Load and validate scenario descriptors.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Scenario JSON file, or a directory searched recursively for `*.json`.
    pub path: PathBuf,
}

// ---- config ----

/// Manage xrdtest configuration.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors.
    Validate,
    /// Show the effective configuration (file + env overrides + defaults).
    Show {
        /// Show only a specific section (general, runner).
        #[arg(long)]
        section: Option<String>,
    },
}
