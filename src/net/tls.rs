//! TLS configuration for both sides of the proxy.
//!
//! - Client-facing: certificate chosen per handshake by [`SnapshotCertResolver`]
//! - Backend-facing: webpki roots plus an optional extra CA file

use std::path::Path;
use std::sync::{Arc, Once};

use rustls::{ClientConfig, RootCertStore, ServerConfig};

use crate::certs::loader::{load_cert_chain, CertificateLoadError};
use crate::certs::SnapshotCertResolver;
use crate::state::ConfigStore;

static INSTALL_PROVIDER: Once = Once::new();

/// Install the process-wide rustls crypto provider (aws-lc-rs) once.
pub fn init_crypto_provider() {
    INSTALL_PROVIDER.call_once(|| {
        // Err means another provider is already installed, which is fine.
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

/// Server config whose certificate follows the store's active snapshot.
pub fn server_config(store: Arc<ConfigStore>) -> Arc<ServerConfig> {
    init_crypto_provider();

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(SnapshotCertResolver::new(store)));
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Arc::new(config)
}

/// Client config for `https` backends. Upstream traffic is always HTTP/1.1.
pub fn upstream_client_config(extra_ca: Option<&Path>) -> Result<Arc<ClientConfig>, CertificateLoadError> {
    init_crypto_provider();

    let mut roots = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    if let Some(path) = extra_ca {
        for cert in load_cert_chain(path)? {
            roots
                .add(cert)
                .map_err(|source| CertificateLoadError::InvalidCertificate {
                    path: path.to_path_buf(),
                    source,
                })?;
        }
        tracing::debug!(ca_file = %path.display(), roots = roots.len(), "Loaded upstream CA certificates");
    }

    let mut config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}
