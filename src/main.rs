use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use usb_backup::core::{Orchestrator, RunOutcome};
use usb_backup::logging::{self, LogConfig};
use usb_backup::{adapters, config, context};

#[derive(Parser, Serialize)]
#[command(name = "usb-backup")]
#[command(
    about = "Back up system preferences, the home directory and installed packages to a USB drive",
    long_about = None
)]
struct Cli {
    /// TOML configuration file
    #[serde(skip)]
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[serde(skip)]
    #[arg(long)]
    print_config: bool,

    /// Debug-level logging
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    verbose: Option<bool>,

    /// JSON console logs
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    json_logs: Option<bool>,

    /// Append logs to this file
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::AppConfig::new(cli.config.as_deref(), Some(&cli))?;

    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let log = logging::init(&LogConfig {
        json: config.json_logs,
        verbose: config.verbose,
        file: config.file_logging.then(|| config.log_file.clone()),
    })
    .context("Failed to initialise logging")?;

    let parts = adapters::system(&config);
    let ctx = context::AppContext::new(config, log);

    match Orchestrator::new(ctx, parts).run().await {
        RunOutcome::Completed(summary) => println!("\n{}", summary),
        RunOutcome::NoPrivilege | RunOutcome::NoDevice => {}
    }

    Ok(())
}
