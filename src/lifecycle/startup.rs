//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration, load certificates
//! - Build the shared store, the upstream TLS client and the dispatch state
//! - Bind listeners and begin accepting traffic
//! - Start the config watcher
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal and nothing is bound
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;

use crate::certs::CertificateLoadError;
use crate::config::validation::resolve_path;
use crate::config::watcher::load_tracked;
use crate::config::{ConfigWatcher, ReloadOutcome, ReloadTrigger};
use crate::http::{HttpServer, ProxyState, Transport};
use crate::lifecycle::shutdown::Shutdown;
use crate::net::tls::{server_config, upstream_client_config};
use crate::net::{ConnectionTracker, Listener, ListenerError, UpstreamConnector};
use crate::observability::{logging, metrics};
use crate::state::{config_dir, ActiveSnapshot, ConfigStore, SnapshotError};

/// Anything that stops the proxy from coming up.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("upstream CA: {0}")]
    UpstreamCa(#[from] CertificateLoadError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("cannot read listener address: {0}")]
    Io(#[from] std::io::Error),
}

/// A running proxy.
pub struct ProxyHandle {
    store: Arc<ConfigStore>,
    tracker: ConnectionTracker,
    http_addr: SocketAddr,
    https_addr: Option<SocketAddr>,
    reload: ReloadTrigger,
    outcomes: broadcast::Sender<ReloadOutcome>,
    shutdown: Shutdown,
    tasks: JoinSet<()>,
}

impl ProxyHandle {
    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    /// `None` when SSL is disabled.
    pub fn https_addr(&self) -> Option<SocketAddr> {
        self.https_addr
    }

    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Receive the outcome of every reload attempt from now on.
    pub fn subscribe_reloads(&self) -> broadcast::Receiver<ReloadOutcome> {
        self.outcomes.subscribe()
    }

    pub fn reload_trigger(&self) -> ReloadTrigger {
        self.reload.clone()
    }

    /// Stop accepting, drain in-flight connections, stop the watcher.
    pub async fn shutdown(mut self) {
        tracing::info!(active_connections = self.tracker.active_count(), "Shutting down");
        self.shutdown.trigger();
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Task failed during shutdown");
            }
        }
        tracing::info!("Shutdown complete");
    }
}

/// Load the config and certificates without binding anything.
pub fn check_config(config_path: &Path) -> Result<ActiveSnapshot, StartupError> {
    let (loaded, _) = load_tracked(config_path, &[], 1);
    let snapshot = loaded?;
    upstream_client_config(upstream_ca_path(config_path, &snapshot).as_deref())?;
    Ok(snapshot)
}

/// Bring the proxy up from the config at `config_path`.
pub async fn start(config_path: &Path) -> Result<ProxyHandle, StartupError> {
    let (loaded, tracked) = load_tracked(config_path, &[], 1);
    let snapshot = loaded?;
    let config = snapshot.config().clone();

    tracing::info!(
        config = %config_path.display(),
        hosts = snapshot.routes().len(),
        certificates = snapshot.certs().host_count(),
        ssl = config.ssl,
        "Configuration loaded"
    );
    logging::log_route_table(&snapshot);
    metrics::set_config_generation(snapshot.generation());

    let client_config = upstream_client_config(upstream_ca_path(config_path, &snapshot).as_deref())?;
    let store = Arc::new(ConfigStore::new(snapshot));
    let tracker = ConnectionTracker::new();
    let state = ProxyState {
        store: Arc::clone(&store),
        connector: UpstreamConnector::new(client_config),
        tracker: tracker.clone(),
    };

    let http_listener = Listener::bind(SocketAddr::new(config.bind_ip, config.port), config.max_connections).await?;
    let https_listener = if config.ssl {
        let addr = SocketAddr::new(config.bind_ip, config.ssl_port);
        Some(Listener::bind(addr, config.max_connections).await?)
    } else {
        None
    };

    let http_addr = http_listener.local_addr()?;
    let https_addr = match &https_listener {
        Some(listener) => Some(listener.local_addr()?),
        None => None,
    };

    let shutdown = Shutdown::new();
    let mut tasks = JoinSet::new();

    let watcher = ConfigWatcher::new(config_path, Arc::clone(&store), tracked);
    let reload = watcher.trigger();
    let outcomes = watcher.outcomes();
    tasks.spawn(watcher.run(shutdown.subscribe()));

    let server = HttpServer::new(state.clone(), config.timeouts.clone());
    let rx = shutdown.subscribe();
    tasks.spawn(async move {
        if let Err(e) = server.run(http_listener, Transport::Plain, rx).await {
            tracing::error!(error = %e, "HTTP listener failed");
        }
    });

    if let Some(listener) = https_listener {
        let acceptor = TlsAcceptor::from(server_config(Arc::clone(&store)));
        let server = HttpServer::new(state, config.timeouts.clone());
        let rx = shutdown.subscribe();
        tasks.spawn(async move {
            if let Err(e) = server.run(listener, Transport::Tls(acceptor), rx).await {
                tracing::error!(error = %e, "HTTPS listener failed");
            }
        });
    }

    tracing::info!(
        http = %http_addr,
        https = ?https_addr,
        "Proxy ready"
    );

    Ok(ProxyHandle {
        store,
        tracker,
        http_addr,
        https_addr,
        reload,
        outcomes,
        shutdown,
        tasks,
    })
}

fn upstream_ca_path(config_path: &Path, snapshot: &ActiveSnapshot) -> Option<PathBuf> {
    snapshot
        .config()
        .upstream_ca_file
        .as_deref()
        .map(|path| resolve_path(&config_dir(config_path), path))
}
