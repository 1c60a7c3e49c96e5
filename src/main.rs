//! Inference relay gateway.
//!
//! ```text
//!   bridge agent ──ws──┐                           ┌── docker CLI
//!   device / unit ─ws──┤   ┌──────────────────┐    │
//!   HTTP callers ──────┼──▶│  axum router     │────┼── compute units
//!   tunnel agent ──────┘   │  bridge │ relay  │    │
//!                          │  tunnels│compute │    └── public tunnel URLs (probes)
//!                          └──────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use inference_relay::compute::DockerCli;
use inference_relay::config::validation::validate_config;
use inference_relay::config::{load_config, ConfigError, GatewayConfig};
use inference_relay::lifecycle::signals::forward_signals;
use inference_relay::lifecycle::{Services, Shutdown};
use inference_relay::observability::{logging, metrics};
use inference_relay::HttpServer;

#[derive(Parser)]
#[command(name = "inference-relay")]
#[command(about = "Relay gateway between hosted compute units and local model runtimes")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }
    validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "inference-relay starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let runtime = Arc::new(DockerCli::new(config.compute.runtime_binary.clone()));
    let services = Services::build(config, runtime)?;

    match services.compute.cleanup_orphans().await {
        Ok(removed) => tracing::info!(removed, "Orphaned compute units cleaned up"),
        Err(e) => tracing::warn!(error = %e, "Orphan cleanup failed"),
    }

    let shutdown = Shutdown::new();
    let tasks = services.start_background(&shutdown)?;
    forward_signals(shutdown.clone());

    let server = HttpServer::new(&services);
    let bind_address = services.config.listener.bind_address.clone();
    match services.config.listener.tls.clone() {
        Some(tls) => {
            let addr: SocketAddr = bind_address.parse()?;
            server.run_tls(addr, &tls, shutdown.subscribe()).await?;
        }
        None => {
            let listener = TcpListener::bind(&bind_address).await?;
            server.run(listener, shutdown.subscribe()).await?;
        }
    }

    tasks.stop().await;
    let result = services.compute.terminate_all().await;
    tracing::info!(
        attempted = result.attempted,
        terminated = result.terminated,
        failed = result.failed,
        "Compute units terminated"
    );

    tracing::info!("Shutdown complete");
    Ok(())
}
