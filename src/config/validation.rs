//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check required host fields, protocol values and TLS pair completeness
//! - Detect duplicate hostnames (after case normalization)
//! - Validate value ranges (timeouts > 0, ports not clashing)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function: ProxyConfig → Result<RouteTable, Vec<ValidationError>>
//! - Relative certificate paths are resolved against the config file's directory

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::schema::{HostConfig, ProxyConfig};
use crate::routing::{Backend, HostEntry, Protocol, RouteTable, TlsPair};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("hostname must not be empty")]
    EmptyHostname,

    #[error("invalid hostname `{0}`")]
    InvalidHostname(String),

    #[error("duplicate hostname `{0}`")]
    DuplicateHost(String),

    #[error("host `{host}`: missing required field `{field}`")]
    MissingField { host: String, field: &'static str },

    #[error("host `{host}`: `ip` must not be empty")]
    EmptyIp { host: String },

    #[error("host `{host}`: `port` must be non-zero")]
    ZeroPort { host: String },

    #[error("host `{host}`: unsupported protocol `{protocol}` (expected `http` or `https`)")]
    InvalidProtocol { host: String, protocol: String },

    #[error("host `{host}`: tls needs both `cert_file` and `key_file`, `{missing}` is missing")]
    IncompleteTlsPair { host: String, missing: &'static str },

    #[error("`port` and `ssl_port` are both {0}")]
    PortConflict(u16),

    #[error("`{0}` must be greater than zero")]
    ZeroSetting(&'static str),
}

/// Wrapper to print a list of errors on one line.
pub struct ValidationErrors<'a>(pub &'a [ValidationError]);

impl fmt::Display for ValidationErrors<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

/// Validate a parsed config and compile its route table.
pub fn validate_config(
    config: &ProxyConfig,
    base_dir: &Path,
) -> Result<RouteTable, Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.ssl && config.port == config.ssl_port && config.port != 0 {
        errors.push(ValidationError::PortConflict(config.port));
    }
    if config.max_connections == 0 {
        errors.push(ValidationError::ZeroSetting("max_connections"));
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::ZeroSetting("timeouts.connect_secs"));
    }
    if config.timeouts.response_secs == 0 {
        errors.push(ValidationError::ZeroSetting("timeouts.response_secs"));
    }
    if config.timeouts.tls_handshake_secs == 0 {
        errors.push(ValidationError::ZeroSetting("timeouts.tls_handshake_secs"));
    }
    if config.timeouts.header_read_secs == 0 {
        errors.push(ValidationError::ZeroSetting("timeouts.header_read_secs"));
    }
    if config.reload.poll_interval_ms == 0 {
        errors.push(ValidationError::ZeroSetting("reload.poll_interval_ms"));
    }

    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(config.hosts.len());

    for (name, host) in config.hosts.iter() {
        let hostname = name.trim().trim_end_matches('.').to_ascii_lowercase();
        if hostname.is_empty() {
            errors.push(ValidationError::EmptyHostname);
            continue;
        }
        if hostname.contains(|c: char| c.is_whitespace() || c == '/' || c == '@') {
            errors.push(ValidationError::InvalidHostname(name.to_string()));
            continue;
        }
        if !seen.insert(hostname.clone()) {
            errors.push(ValidationError::DuplicateHost(hostname));
            continue;
        }

        match validate_host(&hostname, host, base_dir) {
            Ok(entry) => entries.push(entry),
            Err(host_errors) => errors.extend(host_errors),
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    RouteTable::new(entries).map_err(|dup| vec![ValidationError::DuplicateHost(dup.0)])
}

fn validate_host(
    hostname: &str,
    host: &HostConfig,
    base_dir: &Path,
) -> Result<HostEntry, Vec<ValidationError>> {
    let mut errors = Vec::new();
    let missing = |field| ValidationError::MissingField {
        host: hostname.to_string(),
        field,
    };

    let ip = match host.ip.as_deref().map(str::trim) {
        Some("") => {
            errors.push(ValidationError::EmptyIp {
                host: hostname.to_string(),
            });
            None
        }
        Some(ip) => Some(ip.to_string()),
        None => {
            errors.push(missing("ip"));
            None
        }
    };

    let port = match host.port {
        Some(0) => {
            errors.push(ValidationError::ZeroPort {
                host: hostname.to_string(),
            });
            None
        }
        Some(port) => Some(port),
        None => {
            errors.push(missing("port"));
            None
        }
    };

    let protocol = match host.protocol.as_deref() {
        Some(value) => match Protocol::parse(value) {
            Some(protocol) => Some(protocol),
            None => {
                errors.push(ValidationError::InvalidProtocol {
                    host: hostname.to_string(),
                    protocol: value.to_string(),
                });
                None
            }
        },
        None => {
            errors.push(missing("protocol"));
            None
        }
    };

    let tls = match &host.tls {
        None => None,
        Some(tls) => match (&tls.cert_file, &tls.key_file) {
            (Some(cert), Some(key)) => Some(TlsPair::new(
                resolve_path(base_dir, cert),
                resolve_path(base_dir, key),
            )),
            // An empty `tls:` block carries no override.
            (None, None) => None,
            (Some(_), None) => {
                errors.push(ValidationError::IncompleteTlsPair {
                    host: hostname.to_string(),
                    missing: "key_file",
                });
                None
            }
            (None, Some(_)) => {
                errors.push(ValidationError::IncompleteTlsPair {
                    host: hostname.to_string(),
                    missing: "cert_file",
                });
                None
            }
        },
    };

    match (ip, port, protocol) {
        (Some(ip), Some(port), Some(protocol)) if errors.is_empty() => Ok(HostEntry::new(
            hostname,
            Backend::new(ip, port, protocol),
            tls,
        )),
        _ => Err(errors),
    }
}

/// Resolve a config-relative path.
pub fn resolve_path(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{HostTlsConfig, HostsConfig};

    fn config_with(hosts: Vec<(&str, HostConfig)>) -> ProxyConfig {
        ProxyConfig {
            hosts: hosts.into_iter().collect::<HostsConfig>(),
            ..ProxyConfig::default()
        }
    }

    fn base() -> &'static Path {
        Path::new("/etc/hostmux")
    }

    #[test]
    fn builds_route_table_in_order() {
        let config = config_with(vec![
            ("l.j-k.one", HostConfig::new("127.0.0.1", 81, "http")),
            ("API.example.com", HostConfig::new("10.0.0.2", 443, "https")),
        ]);

        let table = validate_config(&config, base()).unwrap();
        let names: Vec<_> = table.iter().map(|e| e.hostname().to_string()).collect();
        assert_eq!(names, ["l.j-k.one", "api.example.com"]);

        let api = table.lookup("api.example.com").unwrap();
        assert_eq!(api.backend().protocol, Protocol::Https);
        assert_eq!(api.backend().port, 443);
    }

    #[test]
    fn duplicate_hostname_is_rejected() {
        let config = config_with(vec![
            ("a.example.com", HostConfig::new("127.0.0.1", 1, "http")),
            ("a.example.com", HostConfig::new("127.0.0.1", 2, "http")),
        ]);

        let errors = validate_config(&config, base()).unwrap_err();
        assert_eq!(errors, vec![ValidationError::DuplicateHost("a.example.com".into())]);
    }

    #[test]
    fn duplicate_differing_only_in_case_is_rejected() {
        let config = config_with(vec![
            ("a.example.com", HostConfig::new("127.0.0.1", 1, "http")),
            ("A.EXAMPLE.COM", HostConfig::new("127.0.0.1", 2, "http")),
        ]);
        assert!(validate_config(&config, base()).is_err());
    }

    #[test]
    fn half_tls_pair_is_rejected_not_ignored() {
        let mut host = HostConfig::new("127.0.0.1", 81, "http");
        host.tls = Some(HostTlsConfig {
            cert_file: Some("certs/a.crt".into()),
            key_file: None,
        });
        let config = config_with(vec![("a.example.com", host)]);

        let errors = validate_config(&config, base()).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::IncompleteTlsPair {
                host: "a.example.com".into(),
                missing: "key_file",
            }]
        );
    }

    #[test]
    fn collects_every_error() {
        let config = config_with(vec![
            ("a.example.com", HostConfig::default()),
            ("b.example.com", HostConfig::new("127.0.0.1", 81, "ftp")),
            ("c.example.com", HostConfig::new(" ", 0, "http")),
        ]);

        let errors = validate_config(&config, base()).unwrap_err();
        assert!(errors.contains(&ValidationError::MissingField {
            host: "a.example.com".into(),
            field: "ip",
        }));
        assert!(errors.contains(&ValidationError::MissingField {
            host: "a.example.com".into(),
            field: "port",
        }));
        assert!(errors.contains(&ValidationError::MissingField {
            host: "a.example.com".into(),
            field: "protocol",
        }));
        assert!(errors.contains(&ValidationError::InvalidProtocol {
            host: "b.example.com".into(),
            protocol: "ftp".into(),
        }));
        assert!(errors.contains(&ValidationError::EmptyIp {
            host: "c.example.com".into()
        }));
        assert!(errors.contains(&ValidationError::ZeroPort {
            host: "c.example.com".into()
        }));
        assert_eq!(errors.len(), 6);
    }

    #[test]
    fn tls_paths_resolve_against_config_dir() {
        let config = config_with(vec![(
            "a.example.com",
            HostConfig::new("127.0.0.1", 81, "http").with_tls("certs/a.crt", "/abs/a.key"),
        )]);

        let table = validate_config(&config, base()).unwrap();
        let tls = table.lookup("a.example.com").unwrap().tls().unwrap();
        assert_eq!(tls.cert_file, PathBuf::from("/etc/hostmux/certs/a.crt"));
        assert_eq!(tls.key_file, PathBuf::from("/abs/a.key"));
    }

    #[test]
    fn listener_ports_must_differ_with_ssl() {
        let config = ProxyConfig {
            ssl: true,
            port: 8443,
            ssl_port: 8443,
            ..ProxyConfig::default()
        };
        let errors = validate_config(&config, base()).unwrap_err();
        assert_eq!(errors, vec![ValidationError::PortConflict(8443)]);
    }

    #[test]
    fn empty_host_set_is_valid() {
        let table = validate_config(&ProxyConfig::default(), base()).unwrap();
        assert!(table.is_empty());
    }
}
