use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use brovakt::config::AppConfig;
use brovakt::host::LoggingHostBridge;
use brovakt::system::TrackerSystem;

#[derive(Parser)]
#[command(name = "brovakt", about = "AIS vessel tracking for the Trollhätte canal bridges")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "brovakt.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect to the AIS stream and track vessels until interrupted.
    Run,
    /// Check that the configuration is complete, then exit.
    ValidateConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load_or_default(&cli.config)?;

    match cli.command {
        Command::ValidateConfig => {
            config.validate()?;
            info!("configuration is valid");
            Ok(())
        }
        Command::Run => {
            config.validate()?;
            let system = TrackerSystem::new(config, Arc::new(LoggingHostBridge));
            let shutdown = system.shutdown_token();

            tokio::spawn(async move {
                shutdown_signal().await;
                info!("signal received, starting graceful shutdown");
                shutdown.cancel();
            });

            system.run().await
        }
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
