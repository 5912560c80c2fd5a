//! Per-handshake certificate selection.
//!
//! # Selection order
//! 1. Dedicated certificate of the host named by SNI (exact, case-insensitive)
//! 2. Global certificate, if configured
//! 3. Certificate of the first host (config order) that has one
//! 4. Nothing: the handshake is aborted
//!
//! A ClientHello without SNI starts at step 2.
//!
//! # Design Decisions
//! - Pure in-memory lookup against the current snapshot, never touches disk
//! - The snapshot is loaded once per handshake, so one handshake sees one generation

use std::sync::Arc;

use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;

use crate::certs::store::CertificateStore;
use crate::observability::metrics;
use crate::state::ConfigStore;

/// No certificate could be chosen for a handshake.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no certificate available for server name {}", server_name.as_deref().unwrap_or("<none>"))]
pub struct NoCertificateAvailable {
    pub server_name: Option<String>,
}

/// Pick the certificate for a handshake.
pub fn resolve_certificate(
    server_name: Option<&str>,
    store: &CertificateStore,
) -> Result<Arc<CertifiedKey>, NoCertificateAvailable> {
    if let Some(name) = server_name {
        let name = name.trim_end_matches('.').to_ascii_lowercase();
        if let Some(certified) = store.host(&name) {
            return Ok(certified.clone());
        }
    }

    store
        .global()
        .or_else(|| store.fallback())
        .cloned()
        .ok_or_else(|| NoCertificateAvailable {
            server_name: server_name.map(str::to_string),
        })
}

/// rustls resolver reading the active snapshot of a [`ConfigStore`].
#[derive(Debug)]
pub struct SnapshotCertResolver {
    store: Arc<ConfigStore>,
}

impl SnapshotCertResolver {
    pub fn new(store: Arc<ConfigStore>) -> Self {
        Self { store }
    }
}

impl ResolvesServerCert for SnapshotCertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let snapshot = self.store.current();
        match resolve_certificate(client_hello.server_name(), snapshot.certs()) {
            Ok(certified) => Some(certified),
            Err(e) => {
                tracing::warn!(
                    generation = snapshot.generation(),
                    error = %e,
                    "Aborting TLS handshake"
                );
                metrics::record_no_certificate();
                None
            }
        }
    }
}
