//! Structured logging.
//!
//! # Responsibilities
//! - Initialize logging subsystem
//! - Log the active route table after startup and every reload
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, pretty format for development
//! - Log level from config, overridden by `RUST_LOG`

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::schema::{LogFormat, ObservabilityConfig};
use crate::state::ActiveSnapshot;

/// Install the global subscriber. Safe to call more than once; later calls are no-ops.
pub fn init_logging(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},tower_http=info", config.log_level)));

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };

    if result.is_err() {
        tracing::debug!("Logging already initialized");
    }
}

/// One line per routed host, in config order.
pub fn log_route_table(snapshot: &ActiveSnapshot) {
    let routes = snapshot.routes();
    if routes.is_empty() {
        tracing::warn!(generation = snapshot.generation(), "Route table is empty, every request will get 404");
        return;
    }

    for entry in routes.iter() {
        tracing::info!(
            generation = snapshot.generation(),
            tls = entry.tls().is_some(),
            "{} -> {}",
            entry.hostname(),
            entry.backend()
        );
    }
}
