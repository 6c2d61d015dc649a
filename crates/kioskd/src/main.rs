//! Kiosk Control Daemon - guarded power operations and health diagnostics
//!
//! Results are printed to stdout as JSON; logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kiosk_common::Config;
use kioskd::retry::{with_retry, RetryPolicy};
use kioskd::{privileges, SystemController};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kioskd")]
#[command(about = "Kiosk control - guarded power operations and health diagnostics", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to /etc/kiosk-control/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the per-command timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a fresh system status snapshot
    Status,

    /// Run the health check (exit code 1 when unhealthy)
    Health,

    /// Suspend the machine
    Sleep,

    /// Request an immediate restart
    Restart,

    /// Request an immediate shutdown
    Shutdown,

    /// Cancel a pending shutdown or restart
    Cancel,

    /// Print the command allowlist
    Policy,
}

impl Commands {
    fn is_power_action(&self) -> bool {
        matches!(
            self,
            Commands::Sleep | Commands::Restart | Commands::Shutdown | Commands::Cancel
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load(),
    };
    if let Some(timeout_ms) = cli.timeout_ms {
        config.executor.command_timeout_ms = timeout_ms;
    }

    init_logging(&config.service.log_level);
    info!("kioskd v{} starting", env!("CARGO_PKG_VERSION"));

    if cli.command.is_power_action() && config.service.require_root {
        privileges::ensure_root().context("Power operations need root")?;
    }

    let controller = SystemController::from_config(&config);

    match cli.command {
        Commands::Status => {
            let retry = RetryPolicy::from_config(&config.retry);
            let status = with_retry(&retry, || controller.status()).await?;
            print_json(&status)?;
        }
        Commands::Health => {
            let result = controller.health_check().await;
            print_json(&result)?;
            if !result.healthy {
                std::process::exit(1);
            }
        }
        Commands::Sleep => {
            controller.sleep().await?;
            print_json(&controller.state())?;
        }
        Commands::Restart => {
            controller.restart().await?;
            print_json(&controller.state())?;
        }
        Commands::Shutdown => {
            controller.shutdown().await?;
            print_json(&controller.state())?;
        }
        Commands::Cancel => {
            controller.cancel_shutdown().await?;
            print_json(&controller.state())?;
        }
        Commands::Policy => {
            let entries: Vec<_> = controller.executor().policy().entries().collect();
            print_json(&entries)?;
        }
    }

    Ok(())
}

fn init_logging(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
