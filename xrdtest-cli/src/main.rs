use anyhow::Result;
use clap::Parser;
use colored::Colorize;

use xrdtest_cli::cli::{Cli, Commands};
use xrdtest_cli::commands;
use xrdtest_cli::error::CliError;
use xrdtest_cli::logging;
use xrdtest_cli::output::OutputWriter;
use xrdtest_core::config::GeneralConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 설정 오류는 명령 실행 시 보고하고, 로깅은 기본값으로라도 초기화
    let config = commands::load_config(&cli.config).await;
    let base = config
        .as_ref()
        .map(|c| c.general.clone())
        .unwrap_or_else(|_| GeneralConfig::default());
    let general = logging::effective_general(&base, cli.log_level.as_deref(), cli.log_format);
    logging::init_tracing(&general)?;

    tracing::debug!(config = %cli.config.display(), "xrdtest starting");

    let writer = OutputWriter::new(cli.output);
    let result = match cli.command {
        Commands::Config(args) => commands::config::execute(args, &cli.config, &writer).await,
        Commands::Validate(args) => commands::validate::execute(args, &writer).await,
        Commands::Run(args) => match config {
            Ok(config) => commands::run::execute(args, &config, &writer).await,
            Err(e) => Err(CliError::Config(e.to_string())),
        },
    };

    if let Err(e) = result {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(e.exit_code());
    }

    Ok(())
}
