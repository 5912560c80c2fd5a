//! Building a complete, validated snapshot from a config file.

use std::path::{Path, PathBuf};

use crate::certs::{CertificateLoadError, CertificateStore};
use crate::config::loader::{load_config, ConfigError};
use crate::config::schema::ProxyConfig;
use crate::config::validation::{resolve_path, validate_config, ValidationError, ValidationErrors};
use crate::routing::{RouteTable, TlsPair};

/// Why a candidate snapshot could not be built.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid configuration: {}", ValidationErrors(.0))]
    Validation(Vec<ValidationError>),

    #[error(transparent)]
    Certificate(#[from] CertificateLoadError),
}

/// One generation of routing + certificate state, always swapped as a unit.
#[derive(Debug)]
pub struct ActiveSnapshot {
    generation: u64,
    config: ProxyConfig,
    routes: RouteTable,
    certs: CertificateStore,
}

impl ActiveSnapshot {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The settings this snapshot was built from.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn certs(&self) -> &CertificateStore {
        &self.certs
    }
}

/// Validate `config` and load its certificates.
///
/// Certificates are only loaded when `ssl` is on.
pub fn build_snapshot(
    config: ProxyConfig,
    base_dir: &Path,
    generation: u64,
) -> Result<ActiveSnapshot, SnapshotError> {
    let routes = validate_config(&config, base_dir).map_err(SnapshotError::Validation)?;

    let certs = if config.ssl {
        let global = global_tls(&config, base_dir);
        CertificateStore::build(&routes, global.as_ref())?
    } else {
        CertificateStore::empty()
    };

    Ok(ActiveSnapshot {
        generation,
        config,
        routes,
        certs,
    })
}

/// Read, validate and load everything referenced by the file at `path`.
pub fn load_snapshot(path: &Path, generation: u64) -> Result<ActiveSnapshot, SnapshotError> {
    let config = load_config(path)?;
    build_snapshot(config, &config_dir(path), generation)
}

/// Directory that relative paths in the config file are resolved against.
pub fn config_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// The global certificate pair, if one is configured.
///
/// Explicit paths always count (a missing file is then a load error). The
/// default paths only count when both files exist.
pub fn global_tls(config: &ProxyConfig, base_dir: &Path) -> Option<TlsPair> {
    if !config.ssl {
        return None;
    }
    let cert = resolve_path(base_dir, &config.ssl_cert_path());
    let key = resolve_path(base_dir, &config.ssl_key_path());

    if config.global_tls_explicit() || (cert.is_file() && key.is_file()) {
        Some(TlsPair::new(cert, key))
    } else {
        None
    }
}

/// Certificate and key files a config refers to, for change tracking.
///
/// Default global paths are included even when absent, so creating them is noticed.
pub fn referenced_files(config: &ProxyConfig, base_dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if !config.ssl {
        return files;
    }

    files.push(resolve_path(base_dir, &config.ssl_cert_path()));
    files.push(resolve_path(base_dir, &config.ssl_key_path()));

    for (_, host) in config.hosts.iter() {
        let Some(tls) = &host.tls else { continue };
        for path in [&tls.cert_file, &tls.key_file].into_iter().flatten() {
            let path = resolve_path(base_dir, path);
            if !files.contains(&path) {
                files.push(path);
            }
        }
    }
    files
}
