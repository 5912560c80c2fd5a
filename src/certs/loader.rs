//! PEM certificate/key loading.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::CertificateDer;
use rustls::sign::CertifiedKey;
use rustls::InconsistentKeys;

/// Failure to turn a certificate/key pair into a usable `CertifiedKey`.
#[derive(Debug, thiserror::Error)]
pub enum CertificateLoadError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed PEM in {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in {}", path.display())]
    NoCertificates { path: PathBuf },

    #[error("no private key found in {}", path.display())]
    NoPrivateKey { path: PathBuf },

    #[error("unsupported private key in {}: {source}", path.display())]
    UnsupportedKey {
        path: PathBuf,
        #[source]
        source: rustls::Error,
    },

    #[error("private key {} does not match certificate {}", key_path.display(), cert_path.display())]
    KeyMismatch { cert_path: PathBuf, key_path: PathBuf },

    #[error("invalid certificate in {}: {source}", path.display())]
    InvalidCertificate {
        path: PathBuf,
        #[source]
        source: rustls::Error,
    },
}

/// Load a PEM certificate chain and private key, checking that they belong together.
pub fn load_certified_key(
    cert_path: &Path,
    key_path: &Path,
) -> Result<Arc<CertifiedKey>, CertificateLoadError> {
    let certs = load_cert_chain(cert_path)?;

    let key_pem = fs::read(key_path).map_err(|source| CertificateLoadError::Io {
        path: key_path.to_path_buf(),
        source,
    })?;
    let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
        .map_err(|source| CertificateLoadError::Malformed {
            path: key_path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| CertificateLoadError::NoPrivateKey {
            path: key_path.to_path_buf(),
        })?;

    let provider = crypto_provider();
    let signing_key = provider
        .key_provider
        .load_private_key(key)
        .map_err(|source| CertificateLoadError::UnsupportedKey {
            path: key_path.to_path_buf(),
            source,
        })?;

    let certified = CertifiedKey::new(certs, signing_key);
    match certified.keys_match() {
        Ok(()) => {}
        Err(rustls::Error::InconsistentKeys(InconsistentKeys::KeyMismatch)) => {
            return Err(CertificateLoadError::KeyMismatch {
                cert_path: cert_path.to_path_buf(),
                key_path: key_path.to_path_buf(),
            });
        }
        Err(e) => {
            // The key type cannot expose its public half; nothing to compare.
            tracing::debug!(cert = %cert_path.display(), error = %e, "Skipping key/certificate match check");
        }
    }

    Ok(Arc::new(certified))
}

/// Load every certificate in a PEM file. An empty chain is an error.
pub fn load_cert_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>, CertificateLoadError> {
    let pem = fs::read(path).map_err(|source| CertificateLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let certs = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| CertificateLoadError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;

    if certs.is_empty() {
        return Err(CertificateLoadError::NoCertificates {
            path: path.to_path_buf(),
        });
    }
    Ok(certs)
}

fn crypto_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}
