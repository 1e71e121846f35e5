//! Paraflow CLI entry point.

use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;

use paraflow::cli::{commands, handle_error, load_config, Cli, Commands};
use paraflow::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => return handle_error(&err, cli.json).into(),
    };

    // Held until exit so the file writer flushes.
    let _logger = match LogConfig::try_from(&config.logging)
        .map_err(anyhow::Error::msg)
        .and_then(|log_config| LoggerImpl::init(&log_config))
        .context("Failed to initialize logging")
    {
        Ok(logger) => logger,
        Err(err) => return handle_error(&err, cli.json).into(),
    };

    let result = match cli.command {
        Commands::Run(args) => commands::run::execute(args, config, cli.json).await,
        Commands::Analyze(args) => commands::analyze::execute(args, config, cli.json).await,
        Commands::Validate(args) => commands::validate::execute(args, config, cli.json).await,
        Commands::Init(args) => commands::init::execute(args, cli.json).await,
    };

    match result {
        Ok(status) => status.into(),
        Err(err) => handle_error(&err, cli.json).into(),
    }
}
