//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → tls.rs (optional TLS handshake, certificate per SNI)
//!     → connection.rs (lifecycle tracking, drain signal)
//!     → Hand off to HTTP layer
//!
//! Outgoing:
//!     upstream.rs (dial backend, TLS for https backends)
//!     relay.rs (byte tunnel for upgraded connections)
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - TLS is optional and handled transparently

pub mod connection;
pub mod listener;
pub mod relay;
pub mod tls;
pub mod upstream;

pub use connection::{ConnectionContext, ConnectionId, ConnectionTracker, DispatchPhase, ListenerKind};
pub use listener::{Listener, ListenerError};
pub use upstream::{DialError, UpstreamConnector, UpstreamStream};
