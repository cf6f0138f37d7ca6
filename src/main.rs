//! Inspecting HTTP Forwarding Proxy
//!
//! Relays every request to one fixed upstream unchanged and prints a
//! readable log of each request, response, and streamed event.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────┐
//!                    │               INSPECTING PROXY                │
//!   Client Request   │  ┌─────────┐   ┌─────────┐   ┌────────────┐  │
//!   ─────────────────┼─▶│   net   │──▶│  http   │──▶│  upstream  │──┼──▶ Upstream
//!                    │  │listener │   │  relay  │   │   client   │  │
//!                    │  └─────────┘   └────┬────┘   └─────┬──────┘  │
//!   Client Response  │                     │              │         │
//!   ◀────────────────┼─────────────────────┴──────────────┘         │
//!                    │          tee │ (every chunk, unchanged)       │
//!                    │              ▼                                │
//!                    │  ┌──────────────────────────────────────┐    │
//!                    │  │ observability: sse decoder + traffic │    │
//!                    │  └──────────────────────────────────────┘    │
//!                    └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use inspect_proxy::config::{self, ProxyConfig};
use inspect_proxy::lifecycle::Shutdown;
use inspect_proxy::observability::logging;
use inspect_proxy::{net, HttpServer};

#[derive(Parser)]
#[command(name = "inspect-proxy")]
#[command(about = "Transparent HTTP proxy that logs the traffic it relays", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides PORT).
    #[arg(short, long)]
    port: Option<u16>,

    /// Upstream base URL (overrides TARGET_URL).
    #[arg(short, long)]
    target: Option<String>,
}

fn load(cli: &Cli) -> Result<ProxyConfig, config::ConfigError> {
    let mut config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => ProxyConfig::default(),
    };
    config::apply_process_env(&mut config)?;
    if let Some(port) = cli.port {
        config.listener.port = port;
    }
    if let Some(target) = &cli.target {
        config.upstream.url = target.clone();
    }
    config::validate_config(&config).map_err(config::ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load(&cli)?;

    logging::init(&config.logging.level);

    tracing::info!("inspect-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        port = config.listener.port,
        upstream = %config.upstream.url,
        include_headers = config.logging.include_headers,
        pretty_json = config.logging.pretty_json,
        "Configuration loaded"
    );

    // Bind first: a port we cannot own is the one fatal error
    let listener = net::bind(&config.listener).await?;

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config)?;
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
