//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, HTTP/1.1 or HTTP/2, drain on shutdown)
//!     → proxy.rs (Host → route lookup in the active snapshot)
//!     → request.rs (origin-form URI, forwarding headers)
//!     → backend over HTTP/1.1
//!     → response.rs (strip hop-by-hop, stream body back)
//!     → body.rs (idle timeout on streamed bodies, both directions)
//!     → websocket.rs (on 101, tunnel raw bytes)
//! ```

pub mod body;
pub mod proxy;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use proxy::ProxyState;
pub use response::DispatchError;
pub use server::{HttpServer, Transport};
