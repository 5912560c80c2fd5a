//! TLS certificate subsystem.
//!
//! # Data Flow
//! ```text
//! RouteTable + global pair
//!     → loader.rs (read PEM, parse, check key matches certificate)
//!     → store.rs (CertificateStore: per-host, global, fallback)
//!     → stored in the ActiveSnapshot
//!
//! On each TLS handshake:
//!     resolver.rs reads the current snapshot
//!     → picks a certificate by SNI, or aborts the handshake
//! ```
//!
//! # Design Decisions
//! - Certificates are parsed once per reload, never during a handshake
//! - A store is built completely or not at all

pub mod loader;
pub mod resolver;
pub mod store;

pub use loader::{load_certified_key, CertificateLoadError};
pub use resolver::{resolve_certificate, NoCertificateAvailable, SnapshotCertResolver};
pub use store::CertificateStore;
