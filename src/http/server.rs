//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the dispatch handler as fallback
//! - Wire up middleware (request ID, tracing)
//! - Run the accept loop for one listener, plain or TLS
//! - Serve HTTP/1.1 and HTTP/2 (TLS via ALPN) on each connection
//! - Drain connections on shutdown, then close what is left

use std::time::Duration;

use axum::Router;
use hyper::body::Incoming;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::config::schema::TimeoutConfig;
use crate::http::proxy::{proxy_handler, ProxyState};
use crate::net::connection::ConnectionGuard;
use crate::net::listener::ConnectionPermit;
use crate::net::{ConnectionTracker, DispatchPhase, Listener, ListenerError, ListenerKind};

/// How long closed connections get to release their sockets after the grace period.
const CLOSE_WAIT: Duration = Duration::from_secs(1);

/// How accepted sockets are turned into HTTP connections.
#[derive(Clone)]
pub enum Transport {
    Plain,
    Tls(TlsAcceptor),
}

impl Transport {
    pub fn kind(&self) -> ListenerKind {
        match self {
            Transport::Plain => ListenerKind::Http,
            Transport::Tls(_) => ListenerKind::Https,
        }
    }
}

/// HTTP server for one listener of the proxy.
pub struct HttpServer {
    router: Router,
    state: ProxyState,
    timeouts: TimeoutConfig,
}

impl HttpServer {
    /// `timeouts` applies to client-side connection handling (handshake, header read, shutdown grace).
    pub fn new(state: ProxyState, timeouts: TimeoutConfig) -> Self {
        let router = Self::build_router(state.clone());
        Self {
            router,
            state,
            timeouts,
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: ProxyState) -> Router {
        Router::new()
            .fallback(proxy_handler)
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id()),
            )
    }

    /// Accept connections until `shutdown` fires, then drain.
    pub async fn run(
        &self,
        listener: Listener,
        transport: Transport,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        let kind = transport.kind();
        let addr = listener.local_addr().map_err(ListenerError::Accept)?;
        tracing::info!(address = %addr, listener = kind.as_str(), "Server starting");

        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!(listener = kind.as_str(), "Shutdown signal received, no longer accepting");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, peer, permit) = match accepted {
                        Ok(accepted) => accepted,
                        Err(ListenerError::Closed) => break,
                        Err(e) => {
                            // Usually fd exhaustion; back off instead of spinning.
                            tracing::warn!(error = %e, "Accept failed");
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            continue;
                        }
                    };

                    let guard = self.state.tracker.track(kind, peer);
                    let span = tracing::info_span!(
                        "connection",
                        connection_id = %guard.id(),
                        peer = %peer,
                        listener = kind.as_str(),
                    );
                    let task = serve_connection(
                        stream,
                        transport.clone(),
                        guard,
                        permit,
                        self.router.clone(),
                        self.timeouts.clone(),
                        self.state.tracker.clone(),
                    );
                    connections.spawn(task.instrument(span));
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        drop(listener);
        self.state.tracker.drain();

        let grace = self.timeouts.shutdown_grace();
        if !self.state.tracker.wait_for_idle(grace).await {
            tracing::warn!(
                listener = kind.as_str(),
                remaining = self.state.tracker.active_count(),
                grace_secs = grace.as_secs(),
                "Grace period elapsed, closing remaining connections"
            );
            // Tunnels run outside this set and stop on the close signal.
            self.state.tracker.close_all();
            connections.abort_all();
        }
        while connections.join_next().await.is_some() {}
        if !self.state.tracker.wait_for_idle(CLOSE_WAIT).await {
            tracing::warn!(
                remaining = self.state.tracker.active_count(),
                "Connections still open after close"
            );
        }

        tracing::info!(listener = kind.as_str(), "Server stopped");
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    transport: Transport,
    mut guard: ConnectionGuard,
    _permit: ConnectionPermit,
    router: Router,
    timeouts: TimeoutConfig,
    tracker: ConnectionTracker,
) {
    match transport {
        Transport::Plain => {
            serve_http(TokioIo::new(stream), &guard, router, &timeouts, &tracker).await;
        }
        Transport::Tls(acceptor) => {
            guard.enter(DispatchPhase::TlsHandshaking);
            match tokio::time::timeout(timeouts.tls_handshake(), acceptor.accept(stream)).await {
                Ok(Ok(tls)) => {
                    serve_http(TokioIo::new(tls), &guard, router, &timeouts, &tracker).await;
                }
                Ok(Err(e)) => {
                    tracing::debug!(error = %e, "TLS handshake failed");
                    guard.enter(DispatchPhase::Rejected);
                    return;
                }
                Err(_) => {
                    tracing::debug!("TLS handshake timed out");
                    guard.enter(DispatchPhase::Rejected);
                    return;
                }
            }
        }
    }
    guard.enter(DispatchPhase::Closed);
}

async fn serve_http<I>(
    io: I,
    guard: &ConnectionGuard,
    router: Router,
    timeouts: &TimeoutConfig,
    tracker: &ConnectionTracker,
) where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let ctx = guard.context();
    let service = hyper::service::service_fn(move |mut request: Request<Incoming>| {
        request.extensions_mut().insert(ctx);
        router.clone().oneshot(request)
    });

    let mut builder = auto::Builder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(timeouts.header_read());

    let connection = builder.serve_connection_with_upgrades(io, service);
    tokio::pin!(connection);

    tokio::select! {
        result = connection.as_mut() => {
            if let Err(e) = result {
                tracing::debug!(error = %e, "Connection ended with error");
            }
        }
        _ = tracker.drained() => {
            connection.as_mut().graceful_shutdown();
            if let Err(e) = connection.await {
                tracing::debug!(error = %e, "Connection ended with error during drain");
            }
        }
    }
}
