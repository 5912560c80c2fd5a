//! hostmux
//!
//! A reverse proxy that routes by Host header (HTTP) and SNI plus Host (HTTPS),
//! and picks up config and certificate changes without a restart.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────────┐
//!                     │                       HOSTMUX                         │
//!                     │                                                       │
//!  Client ────────────┼─▶ net::listener ─▶ [tls: SNI → certs::resolver]       │
//!                     │         │                                             │
//!                     │         ▼                                             │
//!                     │   http::server ─▶ http::proxy ─▶ net::upstream ───────┼──▶ Backend
//!                     │                        │                              │
//!                     │                        ▼                              │
//!                     │               state::ConfigStore (Arc snapshot)       │
//!                     │                        ▲                              │
//!                     │                        │ commit                       │
//!                     │   config::watcher ─────┘  (config + cert files)       │
//!                     │                                                       │
//!                     │   lifecycle (startup, signals, shutdown)              │
//!                     │   observability (tracing, metrics)                    │
//!                     └──────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use hostmux::config::{load_config, ObservabilityConfig};
use hostmux::lifecycle::{check_config, spawn_reload_on_hangup, start, wait_for_shutdown_signal};
use hostmux::observability::{logging, metrics};

#[derive(Debug, Parser)]
#[command(name = "hostmux", version, about = "Host and SNI based reverse proxy with hot reload")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "./config.yml")]
    config: PathBuf,

    /// Validate the configuration and certificates, then exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let observability = match load_config(&args.config) {
        Ok(config) => config.observability,
        Err(e) => {
            logging::init_logging(&ObservabilityConfig::default());
            tracing::error!(error = %e, "Cannot start");
            return Err(e.into());
        }
    };
    logging::init_logging(&observability);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "hostmux starting");

    if args.check {
        let snapshot = check_config(&args.config)?;
        logging::log_route_table(&snapshot);
        tracing::info!(
            hosts = snapshot.routes().len(),
            certificates = snapshot.certs().host_count(),
            "Configuration OK"
        );
        return Ok(());
    }

    if let Some(address) = &observability.metrics_address {
        match address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(e) => {
                tracing::error!(metrics_address = %address, error = %e, "Failed to parse metrics address");
            }
        }
    }

    let handle = match start(&args.config).await {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return Err(e.into());
        }
    };
    let _sighup = spawn_reload_on_hangup(handle.reload_trigger());

    wait_for_shutdown_signal().await;
    handle.shutdown().await;
    Ok(())
}
