//! hostmux: a hot-reloading reverse proxy that routes by Host header and TLS SNI.

// Core subsystems
pub mod certs;
pub mod config;
pub mod http;
pub mod net;
pub mod routing;
pub mod state;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::{start, ProxyHandle, Shutdown, StartupError};
pub use state::{ActiveSnapshot, ConfigStore};
