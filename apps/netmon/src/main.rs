use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use netmon::config::{Config, DEFAULT_CONFIG_PATH};
use netmon::monitoring::MonitoringScheduler;

#[derive(Debug, Parser)]
#[command(version, about = "Periodic uptime and latency monitor")]
struct Cli {
    /// Path to the JSON (or .toml) configuration file, created if missing
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Show a countdown to the next flush on the console
    #[arg(long)]
    countdown: bool,

    /// Probe every endpoint once, write the summary and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    logger::init();

    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)
        .inspect_err(|e| error!("{}", e))
        .with_context(|| format!("could not load configuration from {}", cli.config.display()))?;
    if cli.countdown {
        config.show_countdown = true;
    }

    println!("Starting network monitor with the following configuration:");
    println!("{config}");

    let scheduler = MonitoringScheduler::from_config(&config).context("failed to set up probes")?;

    if cli.once {
        scheduler.run_once().await;
    } else {
        scheduler.run_until(shutdown_signal()).await;
    }

    info!("Network monitor stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
