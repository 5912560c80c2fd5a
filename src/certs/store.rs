//! Immutable set of parsed certificates for one snapshot.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use rustls::sign::CertifiedKey;

use crate::certs::loader::{load_certified_key, CertificateLoadError};
use crate::routing::{RouteTable, TlsPair};

/// Parsed certificates: per host, global, and the last-resort fallback.
///
/// Built in one pass from a route table; any failing file fails the whole build.
#[derive(Debug, Clone, Default)]
pub struct CertificateStore {
    by_host: HashMap<String, Arc<CertifiedKey>>,
    global: Option<Arc<CertifiedKey>>,
    fallback: Option<Arc<CertifiedKey>>,
}

impl CertificateStore {
    /// A store with no certificates. Every handshake against it fails.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load every certificate referenced by `routes` and `global`.
    pub fn build(routes: &RouteTable, global: Option<&TlsPair>) -> Result<Self, CertificateLoadError> {
        // Hosts may share one certificate file; parse each pair once.
        let mut loaded: HashMap<(PathBuf, PathBuf), Arc<CertifiedKey>> = HashMap::new();
        let mut load = |pair: &TlsPair| -> Result<Arc<CertifiedKey>, CertificateLoadError> {
            let key = (pair.cert_file.clone(), pair.key_file.clone());
            if let Some(certified) = loaded.get(&key) {
                return Ok(certified.clone());
            }
            let certified = load_certified_key(&pair.cert_file, &pair.key_file)?;
            loaded.insert(key, certified.clone());
            Ok(certified)
        };

        let mut by_host = HashMap::new();
        for entry in routes.iter() {
            let Some(pair) = entry.tls() else { continue };
            let certified = load(pair)?;
            tracing::debug!(
                host = %entry.hostname(),
                cert_file = %pair.cert_file.display(),
                "Loaded host certificate"
            );
            by_host.insert(entry.hostname().to_string(), certified);
        }

        let fallback = routes
            .first_with_tls()
            .and_then(|entry| by_host.get(entry.hostname()).cloned());

        let global = match global {
            Some(pair) => {
                let certified = load(pair)?;
                tracing::debug!(cert_file = %pair.cert_file.display(), "Loaded global certificate");
                Some(certified)
            }
            None => None,
        };

        Ok(Self {
            by_host,
            global,
            fallback,
        })
    }

    /// Assemble a store from already-parsed keys.
    pub fn from_parts(
        by_host: HashMap<String, Arc<CertifiedKey>>,
        global: Option<Arc<CertifiedKey>>,
        fallback: Option<Arc<CertifiedKey>>,
    ) -> Self {
        Self {
            by_host,
            global,
            fallback,
        }
    }

    /// Dedicated certificate for an already lower-cased hostname.
    pub fn host(&self, hostname: &str) -> Option<&Arc<CertifiedKey>> {
        self.by_host.get(hostname)
    }

    pub fn global(&self) -> Option<&Arc<CertifiedKey>> {
        self.global.as_ref()
    }

    /// Certificate of the first host (config order) with a dedicated pair.
    pub fn fallback(&self) -> Option<&Arc<CertifiedKey>> {
        self.fallback.as_ref()
    }

    /// Number of hosts with a dedicated certificate.
    pub fn host_count(&self) -> usize {
        self.by_host.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_host.is_empty() && self.global.is_none()
    }
}
