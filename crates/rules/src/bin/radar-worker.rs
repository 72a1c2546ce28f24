//! radar-worker: runs the radar scan on a fixed interval.
//!
//! Every tick scores the next batch of unscored runs for every radar. A tick
//! that fires while the previous pass is still running is skipped.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use radar_core::config::{load_dotenv, Config};
use radar_rules::{FilterRegistry, PgStorage, RadarScanner, ScanReport};

// ── CLI ─────────────────────────────────────────────────────────────

/// Radar scan worker.
#[derive(Parser, Debug)]
#[command(name = "radar-worker", version, about)]
struct Cli {
    /// Seconds between scan passes (overrides RADAR_SCAN_INTERVAL_SECS).
    #[arg(long)]
    interval: Option<u64>,

    /// Runs fetched per radar per pass (overrides RADAR_BATCH_SIZE).
    #[arg(long)]
    batch_size: Option<u32>,

    /// Run a single pass and exit.
    #[arg(long)]
    once: bool,

    /// Print the resolved configuration (secrets redacted) and exit.
    #[arg(long)]
    print_config: bool,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(secs) = cli.interval {
        config.scan.interval_secs = secs;
    }
    if let Some(size) = cli.batch_size {
        config.scan.batch_size = size;
    }
    config.validate()?;

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config.redacted_summary())?);
        return Ok(());
    }
    config.log_summary();
    if !config.postgres.is_configured() {
        warn!("PG_URL not set, connecting with local defaults");
    }

    let storage = Arc::new(PgStorage::connect(&config.postgres).await?);
    let registry = Arc::new(FilterRegistry::builtin()?);
    info!(filters = registry.len(), "filter registry loaded");
    let scanner = Arc::new(RadarScanner::new(storage, registry, &config.scan));

    if cli.once {
        match scanner.scan().await? {
            ScanReport::Completed(stats) => info!(?stats, "single scan finished"),
            ScanReport::Skipped => info!("scan skipped"),
        }
        return Ok(());
    }

    info!(interval_secs = config.scan.interval_secs, "radar-worker starting");
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        info!("shutdown requested");
    };
    scanner
        .run_until(Duration::from_secs(config.scan.interval_secs), shutdown)
        .await;
    info!("radar-worker exited cleanly");
    Ok(())
}
