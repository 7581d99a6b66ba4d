pub mod analytics;
pub mod client;
pub mod config;
pub mod download;
pub mod load_config;
pub mod model;
pub mod progress;
pub mod questions;
pub mod reconcile;
pub mod service;

use anyhow::Result;
use clap::{Parser, Subcommand};
use load_config::load_config;
use progress::RunState;
use service::Service;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[clap(
    name = "booking-analytics",
    version,
    about = "Download scheduling data and compute booking analytics"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download the organization's full dataset to the data directory
    Download {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
    /// Compute the full analytics report from downloaded data
    Summary {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
    /// Show what data is available before running full aggregation
    Preview {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Download { config } => {
            let config = load_config(config)?;
            config.trace_loaded();
            let service = Service::new(config);
            let response = service
                .start_download()
                .map_err(|e| anyhow::anyhow!("Failed to start download: {e}"))?;
            println!("{}", response.message);

            let mut last = service.get_progress();
            loop {
                match service.run_state() {
                    RunState::Running => {
                        let progress = service.get_progress();
                        if progress != last {
                            println!(
                                "[{}%] Step {}/{}: {}",
                                progress.percentage,
                                progress.current_step,
                                progress.total_steps,
                                progress.step_name
                            );
                            last = progress;
                        }
                        tokio::time::sleep(Duration::from_millis(200)).await;
                    }
                    RunState::Finished(summary) => {
                        println!("Download complete.\nSummary:");
                        println!("{}", serde_json::to_string_pretty(&summary)?);
                        return Ok(());
                    }
                    RunState::Failed(message) => {
                        eprintln!("[ERROR] Download failed: {message}");
                        return Err(anyhow::anyhow!(message));
                    }
                    RunState::Idle => return Ok(()),
                }
            }
        }
        Commands::Summary { config } => {
            let config = load_config(config)?;
            config.trace_loaded();
            let service = Service::new(config);
            match service.get_summary() {
                Ok(report) => {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                    Ok(())
                }
                Err(e) => {
                    eprintln!("[ERROR] {e}");
                    Err(anyhow::anyhow!(e.to_string()))
                }
            }
        }
        Commands::Preview { config } => {
            let config = load_config(config)?;
            config.trace_loaded();
            let service = Service::new(config);
            let preview = service
                .get_preview()
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            println!("{}", serde_json::to_string_pretty(&preview)?);
            Ok(())
        }
    }
}
