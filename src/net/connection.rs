//! Connection state machine and lifecycle tracking.
//!
//! # Responsibilities
//! - Track connection phase (Accepted → TlsHandshaking → HeaderRead → Routed → Streaming → Closed)
//! - Generate unique connection IDs for tracing
//! - Coordinate graceful shutdown per-connection
//! - Collect per-connection metrics

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::observability::metrics;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Which listener accepted a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerKind {
    Http,
    Https,
}

impl ListenerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListenerKind::Http => "http",
            ListenerKind::Https => "https",
        }
    }

    /// Value for `x-forwarded-proto`.
    pub fn scheme(&self) -> &'static str {
        self.as_str()
    }
}

/// Where a connection (or the request on it) is in the dispatch flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPhase {
    Accepted,
    TlsHandshaking,
    HeaderRead,
    Routed,
    Streaming,
    Closed,
    Rejected,
}

impl DispatchPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchPhase::Accepted => "accepted",
            DispatchPhase::TlsHandshaking => "tls_handshaking",
            DispatchPhase::HeaderRead => "header_read",
            DispatchPhase::Routed => "routed",
            DispatchPhase::Streaming => "streaming",
            DispatchPhase::Closed => "closed",
            DispatchPhase::Rejected => "rejected",
        }
    }
}

impl fmt::Display for DispatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-connection facts made available to request handlers.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionContext {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    pub listener: ListenerKind,
}

impl ConnectionContext {
    /// Log a phase transition of a request on this connection.
    pub fn enter(&self, phase: DispatchPhase) {
        tracing::trace!(connection_id = %self.id, phase = %phase, "Dispatch phase");
    }
}

/// Tracks active connections for graceful shutdown.
///
/// Shutdown happens in two steps. On drain, connections finish in-flight requests and
/// stop taking new ones. On close, whatever is still open (upgraded tunnels included)
/// is dropped.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
    drain_tx: Arc<watch::Sender<bool>>,
    close_tx: Arc<watch::Sender<bool>>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        let (drain_tx, _) = watch::channel(false);
        let (close_tx, _) = watch::channel(false);
        Self {
            active_count: Arc::new(AtomicU64::new(0)),
            drain_tx: Arc::new(drain_tx),
            close_tx: Arc::new(close_tx),
        }
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self, listener: ListenerKind, peer: SocketAddr) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        metrics::connection_opened(listener.as_str());
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            context: ConnectionContext {
                id: ConnectionId::new(),
                peer,
                listener,
            },
            phase: DispatchPhase::Accepted,
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Ask every tracked connection to finish its in-flight work and close.
    pub fn drain(&self) {
        self.drain_tx.send_replace(true);
    }

    /// Resolves once draining has started.
    pub async fn drained(&self) {
        wait_until_set(self.drain_tx.subscribe()).await;
    }

    /// Tell every connection still open to stop now.
    pub fn close_all(&self) {
        self.close_tx.send_replace(true);
    }

    /// Resolves once [`close_all`](Self::close_all) has been called.
    pub async fn closed(&self) {
        wait_until_set(self.close_tx.subscribe()).await;
    }

    /// Wait until all connections are closed or `timeout` elapses. Returns true if idle.
    pub async fn wait_for_idle(&self, timeout: Duration) -> bool {
        let wait = async {
            while self.active_count() > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

async fn wait_until_set(mut rx: watch::Receiver<bool>) {
    // The sender lives as long as the tracker, so an error only means "never".
    if rx.wait_for(|set| *set).await.is_err() {
        std::future::pending::<()>().await;
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    context: ConnectionContext,
    phase: DispatchPhase,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.context.id
    }

    pub fn context(&self) -> ConnectionContext {
        self.context
    }

    pub fn phase(&self) -> DispatchPhase {
        self.phase
    }

    /// Move the connection to `phase`.
    pub fn enter(&mut self, phase: DispatchPhase) {
        self.phase = phase;
        self.context.enter(phase);
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        metrics::connection_closed(self.context.listener.as_str());
        tracing::trace!(connection_id = %self.context.id, last_phase = %self.phase, "Connection closed");
    }
}
