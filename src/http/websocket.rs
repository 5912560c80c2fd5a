//! Protocol upgrade (WebSocket) tunnelling.
//!
//! # Responsibilities
//! - Hand the backend's 101 response to the client
//! - Once both sides have switched protocols, relay raw bytes
//!
//! # Data Flow
//! ```text
//! Client ←──── raw bytes ────→ Proxy ←──── raw bytes ────→ Backend
//! ```
//!
//! # Design Decisions
//! - Byte-level relay, no frame parsing; any `Upgrade` protocol works
//! - Close propagates as a half-close; errors tear down both sides
//! - Tunnels outlive their HTTP connection, so they stop on the tracker's close signal

use std::time::Duration;

use axum::body::Body;
use axum::http::Response;
use hyper::body::Incoming;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;

use crate::net::relay::relay;
use crate::net::connection::ConnectionGuard;
use crate::net::{ConnectionTracker, DispatchPhase};

/// Answer the client with the backend's 101 and tunnel once both upgrades complete.
///
/// `guard` keeps the tunnel counted as a live connection until it closes.
/// The tunnel is torn down when `tracker` signals close after the shutdown grace period.
pub fn tunnel(
    mut upstream_response: Response<Incoming>,
    client_upgrade: OnUpgrade,
    idle_timeout: Option<Duration>,
    mut guard: ConnectionGuard,
    tracker: ConnectionTracker,
    backend: String,
) -> Response<Body> {
    let upstream_upgrade = hyper::upgrade::on(&mut upstream_response);
    let (parts, _) = upstream_response.into_parts();

    tokio::spawn(async move {
        let ctx = guard.context();
        let upgrades = async { tokio::try_join!(client_upgrade, upstream_upgrade) };
        let (client, upstream) = tokio::select! {
            upgraded = upgrades => match upgraded {
                Ok(upgraded) => upgraded,
                Err(e) => {
                    tracing::warn!(connection_id = %ctx.id, backend = %backend, error = %e, "Upgrade failed");
                    guard.enter(DispatchPhase::Rejected);
                    return;
                }
            },
            _ = tracker.closed() => {
                guard.enter(DispatchPhase::Closed);
                return;
            }
        };
        guard.enter(DispatchPhase::Streaming);
        tracing::debug!(connection_id = %ctx.id, backend = %backend, "Tunnel open");

        tokio::select! {
            relayed = relay(TokioIo::new(client), TokioIo::new(upstream), idle_timeout) => match relayed {
                Ok(stats) => tracing::debug!(
                    connection_id = %ctx.id,
                    backend = %backend,
                    client_to_upstream = stats.client_to_upstream,
                    upstream_to_client = stats.upstream_to_client,
                    "Tunnel closed"
                ),
                Err(e) => tracing::debug!(
                    connection_id = %ctx.id,
                    backend = %backend,
                    error = %e,
                    "Tunnel aborted"
                ),
            },
            // Dropping the relay drops both upgraded streams, closing the sockets.
            _ = tracker.closed() => {
                tracing::debug!(connection_id = %ctx.id, backend = %backend, "Tunnel closed at shutdown");
            }
        }
        guard.enter(DispatchPhase::Closed);
    });

    Response::from_parts(parts, Body::empty())
}
