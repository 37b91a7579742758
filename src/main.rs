//! Flight data aggregation service CLI
//!
//! Continuously collects aircraft positions from all configured sources and
//! publishes fused per-region snapshots.

use clap::Parser;
use skyfuse::{
    blender::Blender, config::Config, metadata::MetadataStore, orchestrator::Orchestrator,
    store::Store,
};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "skyfuse")]
#[command(about = "Multi-source live flight data aggregator", long_about = None)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(
        short,
        long,
        env = "SKYFUSE_CONFIG",
        default_value = "config/skyfuse.yaml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting flight data aggregator");
    tracing::info!("Config: {}", cli.config.display());

    let config = Config::load(&cli.config)?;
    let store = Store::connect(config.store.url.as_deref()).await;
    let metadata = Arc::new(
        MetadataStore::open(store.clone(), config.metadata.dataset_path.as_deref()).await,
    );
    let blender = Arc::new(Blender::new(metadata));

    let orchestrator = Orchestrator::new(&config, store, blender);
    let running = orchestrator.running_handle();
    let stats = orchestrator.stats_handles();

    // Spawn stats reporting task
    let stats_handle = {
        let stats = stats.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                for (name, collector_stats) in &stats {
                    let s = collector_stats.snapshot();
                    tracing::info!(
                        "Stats [{}]: requests={}, success={:.1}%, last_count={}",
                        name,
                        s.requests,
                        s.success_rate,
                        s.last_aircraft_count
                    );
                }
            }
        })
    };

    let loop_handle = tokio::spawn(orchestrator.run());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down...");
            running.store(false, Ordering::Relaxed);
        }
        result = loop_handle => {
            if let Err(e) = result {
                tracing::error!("Collection loop error: {}", e);
            }
        }
    }

    stats_handle.abort();

    tracing::info!("Final statistics:");
    for (name, collector_stats) in &stats {
        let s = collector_stats.snapshot();
        tracing::info!(
            "  {}: {} requests, {} successes, {} failures",
            name,
            s.requests,
            s.successes,
            s.failures
        );
    }

    Ok(())
}
