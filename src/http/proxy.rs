//! Host-based dispatch of one request to its backend.
//!
//! # Data Flow
//! ```text
//! request
//!     → Host header (or URI authority) → normalized hostname
//!     → ConfigStore::current() → RouteTable lookup
//!     → dial backend (TLS for https), one attempt
//!     → HTTP/1.1 exchange, bodies streamed both ways
//!     → 101? hand both upgraded streams to the tunnel
//! ```
//!
//! # Design Decisions
//! - Routing uses the decrypted Host, never the TLS SNI
//! - Unknown hosts are answered locally; no backend is contacted
//! - One fresh backend connection per request, no retry
//! - Per-request timeouts come from the snapshot, so they follow reloads
//! - Bodies stream both ways under the idle timeout

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Extension, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use hyper_util::rt::TokioIo;

use crate::http::request::{is_upgrade_request, prepare_upstream_request, request_host};
use crate::http::body::IdleTimeout;
use crate::http::response::{prepare_downstream_response, DispatchError};
use crate::http::websocket;
use crate::net::{ConnectionContext, ConnectionTracker, DispatchPhase, UpstreamConnector};
use crate::observability::metrics;
use crate::state::ConfigStore;

/// Shared state of the dispatch handler.
#[derive(Clone)]
pub struct ProxyState {
    pub store: Arc<ConfigStore>,
    pub connector: UpstreamConnector,
    pub tracker: ConnectionTracker,
}

/// Axum fallback handler: every request on every path lands here.
pub async fn proxy_handler(
    State(state): State<ProxyState>,
    Extension(ctx): Extension<ConnectionContext>,
    request: Request,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = match dispatch(&state, ctx, request).await {
        Ok(response) => response,
        Err(e) => {
            ctx.enter(DispatchPhase::Rejected);
            match &e {
                DispatchError::MissingHost | DispatchError::UnknownHost(_) | DispatchError::InvalidRequest(_) => {
                    tracing::info!(method = %method, path = %path, error = %e, "Request rejected");
                }
                _ => {
                    tracing::warn!(method = %method, path = %path, error = %e, "Backend request failed");
                }
            }
            e.into_response()
        }
    };

    metrics::record_request(ctx.listener.as_str(), response.status().as_u16(), start);
    response
}

async fn dispatch(
    state: &ProxyState,
    ctx: ConnectionContext,
    mut request: Request,
) -> Result<Response, DispatchError> {
    ctx.enter(DispatchPhase::HeaderRead);
    let host = request_host(&request).ok_or(DispatchError::MissingHost)?;

    let snapshot = state.store.current();
    let entry = snapshot
        .routes()
        .lookup(&host)
        .ok_or_else(|| DispatchError::UnknownHost(host.clone()))?;
    let backend = entry.backend().clone();
    let timeouts = snapshot.config().timeouts.clone();
    drop(snapshot);

    ctx.enter(DispatchPhase::Routed);
    tracing::debug!(host = %host, backend = %backend, generation = state.store.generation(), "Routing request");

    let upgrade = is_upgrade_request(request.version(), request.headers());
    let client_upgrade = upgrade.then(|| hyper::upgrade::on(&mut request));
    let mut upstream_request = prepare_upstream_request(request, &ctx, upgrade)?;
    if let Some(idle) = timeouts.idle() {
        upstream_request = upstream_request.map(|body| Body::new(IdleTimeout::new(body, idle)));
    }

    let stream = state.connector.connect(&backend, timeouts.connect()).await?;
    let (mut sender, connection) = hyper::client::conn::http1::handshake::<_, Body>(TokioIo::new(stream))
        .await
        .map_err(|source| DispatchError::Upstream {
            backend: backend.to_string(),
            source,
        })?;

    let conn_backend = backend.to_string();
    tokio::spawn(async move {
        if let Err(e) = connection.with_upgrades().await {
            tracing::debug!(backend = %conn_backend, error = %e, "Backend connection closed with error");
        }
    });

    let response = tokio::time::timeout(timeouts.response(), sender.send_request(upstream_request))
        .await
        .map_err(|_| DispatchError::BackendTimeout {
            backend: backend.to_string(),
            timeout: timeouts.response(),
        })?
        .map_err(|source| DispatchError::Upstream {
            backend: backend.to_string(),
            source,
        })?;

    ctx.enter(DispatchPhase::Streaming);

    if response.status() == StatusCode::SWITCHING_PROTOCOLS {
        if let Some(client_upgrade) = client_upgrade {
            let guard = state.tracker.track(ctx.listener, ctx.peer);
            return Ok(websocket::tunnel(
                response,
                client_upgrade,
                timeouts.idle(),
                guard,
                state.tracker.clone(),
                backend.to_string(),
            ));
        }
        return Err(DispatchError::BadResponse {
            backend: backend.to_string(),
            reason: "101 Switching Protocols without an upgrade request",
        });
    }

    Ok(prepare_downstream_response(response, timeouts.idle()))
}
