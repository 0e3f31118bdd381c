mod cli;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Command};
use colored::Colorize;
use serversync::client::{self, NoProgress, ProgressBarSink, ProgressSink};
use serversync::server;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = cli
        .resolve_config()
        .context("Failed to load configuration")?;

    match cli.command {
        Command::Server { .. } => {
            tokio::select! {
                result = server::serve(config.server) => result.context("Server stopped")?,
                _ = tokio::signal::ctrl_c() => info!("Shutting down"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Client { quiet, .. } => {
            let progress: Arc<dyn ProgressSink> = if quiet {
                Arc::new(NoProgress)
            } else {
                Arc::new(ProgressBarSink::new())
            };

            match client::sync(&config.client, progress).await {
                Ok(report) => {
                    println!(
                        "{} {} updated, {} deleted, {} ignored",
                        "Sync finished:".bold(),
                        report.updated.to_string().green(),
                        report.deleted.to_string().yellow(),
                        report.ignored
                    );
                    if report.delete_failures > 0 {
                        println!(
                            "{} {} files could not be deleted",
                            "Warning:".yellow().bold(),
                            report.delete_failures
                        );
                    }
                    if report.failed {
                        println!("{} some files could not be updated", "Error:".red().bold());
                        return Ok(ExitCode::FAILURE);
                    }
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    error!("Sync failed: {}", e);
                    eprintln!("{} {}", "Error:".red().bold(), e);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
    }
}
