//! Netpulse collector entry point
//!
//! Runs the continuous measurement loop: path discovery, per-hop latency
//! probing and periodic throughput tests, persisted to SQLite and hourly
//! CSV files until shutdown.

use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use netpulse_collector::probes::ToolProbes;
use netpulse_collector::{Scheduler, ThroughputPlan};
use netpulse_core::{CollectorConfig, HourlyCsvLog, MeasurementStore};

/// Netpulse collector command line interface
#[derive(Parser)]
#[command(name = "netpulse-collector")]
#[command(about = "Continuous network measurement collector")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = initialize_logging(&cli) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    if let Err(e) = run(&cli).await {
        error!("Collector failed: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            let mut config =
                CollectorConfig::from_file(path).context("loading collector configuration")?;
            config.apply_env()?;
            config.validate()?;
            config
        }
        None => CollectorConfig::load_with_fallback(None::<&PathBuf>)
            .context("loading collector configuration")?,
    };

    // Persistence is fatal when unavailable at startup; a collector that
    // cannot record anything has nothing to do.
    let db_path = config.db_path();
    let store = MeasurementStore::open(&db_path)
        .with_context(|| format!("opening measurement database at {}", db_path.display()))?;
    let csv = HourlyCsvLog::new(config.log_dir.clone())
        .with_context(|| format!("opening CSV log tree at {}", config.log_dir.display()))?;
    info!(
        "Persisting to {} and hourly CSVs under {}",
        db_path.display(),
        config.log_dir.display()
    );

    let probes = ToolProbes::detect(&config.speedtest.tool);
    let plan = match &probes.speedtest {
        Some(tool) => Some(
            ThroughputPlan::build(
                tool,
                &config.speedtest.server_ids,
                config.speedtest.auto_select,
                config.speedtest.auto_num_servers,
            )
            .await,
        ),
        None => None,
    };

    let token = CancellationToken::new();
    spawn_signal_handler(token.clone());

    let mut scheduler = Scheduler::new(config, probes, store, csv, plan);
    scheduler.run(token).await;

    Ok(())
}

/// Initialize logging based on command line flags
fn initialize_logging(cli: &Cli) -> anyhow::Result<()> {
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("netpulse_collector={}", log_level).parse()?)
        .add_directive(format!("netpulse_core={}", log_level).parse()?)
        .add_directive("tokio=warn".parse()?)
        .add_directive("mio=warn".parse()?);

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .init();
    }

    Ok(())
}

/// Request shutdown on SIGINT or SIGTERM. A second signal is not handled
/// specially; probes in flight finish within their own timeouts.
fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received SIGINT, initiating graceful shutdown");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown");
            }
        }
        token.cancel();
    });
}
