use linkctl::cli::Cli;
use linkctl::config::LinkctlConfig;
use linkctl::logger::{DEFAULT_LEVEL, initialize as LoggerInitialize};

use link_core::app_config_dir;

use std::env::temp_dir;
use std::process::ExitCode;

use clap::Parser;
use log::{LevelFilter, debug, error};

#[tokio::main]
async fn main() -> ExitCode {
    // .env values become LINKCTL_* defaults for clap; real env vars win
    let dotenv = dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let level = if cli.connection.verbose {
        LevelFilter::Debug
    } else {
        DEFAULT_LEVEL
    };
    let log_dir = app_config_dir()
        .unwrap_or_else(|| temp_dir().join("linkctl"))
        .join("logs");
    let logging = match LoggerInitialize(&log_dir, level) {
        Ok(()) => true,
        Err(e) => {
            eprintln!("linkctl: logging disabled: {e}");
            false
        }
    };
    if let Some(path) = dotenv {
        debug!("Loaded environment from {}", path.display());
    }

    let mut config = match LinkctlConfig::load(cli.connection.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            report(logging, &e);
            return ExitCode::FAILURE;
        }
    };
    config.apply_args(&cli.connection);

    match cli.run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(logging, &e);
            ExitCode::from(e.exit_code())
        }
    }
}

/// The logger already writes errors to stderr; fall back to eprintln without it.
fn report(logging: bool, error: &dyn std::error::Error) {
    if logging {
        error!("{error}");
    } else {
        eprintln!("linkctl: {error}");
    }
}
