//! cardsim runner binary.
//!
//! # Usage
//!
//! ```bash
//! # Run the built-in terminal ↔ card demo
//! cardsim-runner
//!
//! # Run a saved graph document
//! cardsim-runner --graph networks/payments.json
//!
//! # Run a graph from a store directory
//! cardsim-runner --store networks --name Payments
//! ```

use std::path::PathBuf;

use cardsim_runner::{GraphSource, RunnerConfig};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// cardsim network runner
#[derive(Parser, Debug)]
#[command(name = "cardsim-runner")]
#[command(about = "Run a smart-card simulation network headless")]
#[command(version)]
struct Args {
    /// Graph document to run
    #[arg(short, long, conflicts_with_all = ["store", "name"])]
    graph: Option<PathBuf>,

    /// Graph store directory
    #[arg(short, long, requires = "name")]
    store: Option<PathBuf>,

    /// Graph id within the store
    #[arg(short, long, requires = "store")]
    name: Option<String>,

    /// Maximum time to wait for terminals, in milliseconds
    #[arg(long, default_value = "5000")]
    timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> RunnerConfig {
        let source = match (self.graph, self.store, self.name) {
            (Some(path), _, _) => GraphSource::File(path),
            (None, Some(dir), Some(name)) => GraphSource::Store { dir, name },
            _ => GraphSource::Demo,
        };
        RunnerConfig { source, timeout_ms: self.timeout_ms, log_level: self.log_level }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Args::parse().into_config();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("cardsim runner starting");

    let report = cardsim_runner::run(config).await?;

    if report.timed_out {
        tracing::warn!("Run timed out before every terminal finished");
    }
    tracing::info!(graph = %report.graph, errors = report.error_count(), "run complete");

    Ok(())
}
