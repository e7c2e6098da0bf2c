//! Netpulse query server entry point
//!
//! Serves the read-only HTTP API over the measurement database written by
//! the collector. The server is stateless; it can start before the
//! collector and answers with empty results until data exists.

use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use netpulse_core::ServerConfig;

mod api;

use api::AppState;

/// Netpulse query server command line interface
#[derive(Parser)]
#[command(name = "netpulse-server")]
#[command(about = "HTTP query server over netpulse measurement data")]
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
        error!("Server failed: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            let mut config =
                ServerConfig::from_file(path).context("loading server configuration")?;
            config.apply_env()?;
            config.validate()?;
            config
        }
        None => ServerConfig::load_with_fallback(None::<&PathBuf>)
            .context("loading server configuration")?,
    };

    let state = AppState {
        db_path: config.db_path(),
        default_window_ms: i64::from(config.default_window_hours) * 3600 * 1000,
    };
    info!("Serving measurements from {}", state.db_path.display());

    let app = api::router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    info!("Server stopped");
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
        .add_directive(format!("netpulse_server={}", log_level).parse()?)
        .add_directive(format!("netpulse_core={}", log_level).parse()?)
        .add_directive("tower_http=info".parse()?)
        .add_directive("hyper=warn".parse()?)
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

/// Resolve on SIGINT or SIGTERM
async fn shutdown_signal() {
    let sigterm = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, shutting down");
        }
        _ = sigterm => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
