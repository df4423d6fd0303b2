//! FarmFresh guard entry point.

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use farmfresh_guard::config::watcher::ConfigWatcher;
use farmfresh_guard::config::{load_config, load_default};
use farmfresh_guard::lifecycle::{build_server, signals, Shutdown};
use farmfresh_guard::observability::{logging, metrics};
use farmfresh_guard::quota::TierPolicy;

#[derive(Parser)]
#[command(name = "farmfresh-guard")]
#[command(about = "Rate limiting, validation, and circuit breaking in front of the FarmFresh storefront", long_about = None)]
struct Args {
    /// TOML config file. Watched for quota tier changes.
    #[arg(short, long, env = "GUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => load_default()?,
    };

    if args.check {
        println!("Configuration OK ({} operations)", config.effective_operations().len());
        return Ok(());
    }

    logging::init_logging(&config.observability)?;
    tracing::info!("farmfresh-guard v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.base_url,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    // Keep the watcher alive for the life of the server.
    let (_watcher, policy_updates) = match &args.config {
        Some(path) => {
            let (watcher, rx) = ConfigWatcher::new(path, TierPolicy::from(&config.quota));
            (Some(watcher.run()?), rx)
        }
        None => {
            let (_tx, rx) = mpsc::unbounded_channel();
            (None, rx)
        }
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = build_server(config)?;

    let shutdown = Shutdown::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        signals::shutdown_on_signal(&signal).await;
    });

    server.run(listener, policy_updates, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
