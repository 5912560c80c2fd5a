//! Configuration schema definitions.
//!
//! This module defines the configuration structure read from the YAML file.
//! Host entries are kept in their raw form (every field optional) so that a
//! missing field is reported by validation with the host it belongs to,
//! rather than as an opaque deserialization error.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Global key used when `ssl_key_file` is not set.
pub const DEFAULT_SSL_KEY_FILE: &str = "./ssl/private.pem";

/// Global certificate used when `ssl_cert_file` is not set.
pub const DEFAULT_SSL_CERT_FILE: &str = "./ssl/certificate.crt";

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ProxyConfig {
    /// Plain HTTP listen port.
    pub port: u16,

    /// Enable the HTTPS listener.
    pub ssl: bool,

    /// HTTPS listen port.
    pub ssl_port: u16,

    /// Global fallback key. `None` means the default path.
    pub ssl_key_file: Option<PathBuf>,

    /// Global fallback certificate. `None` means the default path.
    pub ssl_cert_file: Option<PathBuf>,

    /// Hostname → backend, in file order.
    pub hosts: HostsConfig,

    /// Address both listeners bind to.
    pub bind_ip: IpAddr,

    /// Maximum concurrent connections per listener (backpressure).
    pub max_connections: usize,

    /// Extra PEM trust anchors for `https` backends, on top of the webpki roots.
    pub upstream_ca_file: Option<PathBuf>,

    pub timeouts: TimeoutConfig,

    pub reload: ReloadConfig,

    pub observability: ObservabilityConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: 80,
            ssl: false,
            ssl_port: 443,
            ssl_key_file: None,
            ssl_cert_file: None,
            hosts: HostsConfig::default(),
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            max_connections: 10_000,
            upstream_ca_file: None,
            timeouts: TimeoutConfig::default(),
            reload: ReloadConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl ProxyConfig {
    /// True when either global TLS path was written in the file.
    pub fn global_tls_explicit(&self) -> bool {
        self.ssl_cert_file.is_some() || self.ssl_key_file.is_some()
    }

    /// Global certificate path, falling back to the default location.
    pub fn ssl_cert_path(&self) -> PathBuf {
        self.ssl_cert_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SSL_CERT_FILE))
    }

    /// Global key path, falling back to the default location.
    pub fn ssl_key_path(&self) -> PathBuf {
        self.ssl_key_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SSL_KEY_FILE))
    }

    /// Whether two configs need different listener sockets.
    pub fn listeners_differ(&self, other: &ProxyConfig) -> bool {
        self.port != other.port
            || self.ssl != other.ssl
            || self.ssl_port != other.ssl_port
            || self.bind_ip != other.bind_ip
            || self.max_connections != other.max_connections
    }
}

/// Raw host entry as written in the file.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct HostConfig {
    pub ip: Option<String>,
    pub port: Option<u16>,
    pub protocol: Option<String>,
    pub tls: Option<HostTlsConfig>,
}

impl HostConfig {
    pub fn new(ip: impl Into<String>, port: u16, protocol: impl Into<String>) -> Self {
        Self {
            ip: Some(ip.into()),
            port: Some(port),
            protocol: Some(protocol.into()),
            tls: None,
        }
    }

    pub fn with_tls(mut self, cert_file: impl Into<PathBuf>, key_file: impl Into<PathBuf>) -> Self {
        self.tls = Some(HostTlsConfig {
            cert_file: Some(cert_file.into()),
            key_file: Some(key_file.into()),
        });
        self
    }
}

/// Per-host certificate override.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct HostTlsConfig {
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
}

/// The `hosts` mapping with its file order preserved.
///
/// Duplicate keys are kept so validation can report them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostsConfig(Vec<(String, HostConfig)>);

impl HostsConfig {
    pub fn push(&mut self, hostname: impl Into<String>, host: HostConfig) {
        self.0.push((hostname.into(), host));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HostConfig)> {
        self.0.iter().map(|(name, host)| (name.as_str(), host))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, HostConfig)> for HostsConfig {
    fn from_iter<I: IntoIterator<Item = (S, HostConfig)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(name, host)| (name.into(), host)).collect())
    }
}

impl<'de> Deserialize<'de> for HostsConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HostsVisitor;

        impl<'de> Visitor<'de> for HostsVisitor {
            type Value = HostsConfig;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of hostname to host settings")
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
                Ok(HostsConfig::default())
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut hosts = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((name, host)) = map.next_entry::<String, HostConfig>()? {
                    hosts.push((name, host));
                }
                Ok(HostsConfig(hosts))
            }
        }

        deserializer.deserialize_any(HostsVisitor)
    }
}

impl Serialize for HostsConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, host) in &self.0 {
            map.serialize_entry(name, host)?;
        }
        map.end()
    }
}

/// Timeout configuration for connections and upstream calls.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Backend connection establishment (TCP + TLS) in seconds.
    pub connect_secs: u64,

    /// Wait for backend response headers in seconds.
    pub response_secs: u64,

    /// Client TLS handshake in seconds.
    pub tls_handshake_secs: u64,

    /// Client request header read in seconds.
    pub header_read_secs: u64,

    /// Upgraded tunnels and streamed bodies with no traffic for this many seconds are closed. 0 disables.
    pub idle_secs: u64,

    /// Time given to in-flight connections on shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            response_secs: 60,
            tls_handshake_secs: 10,
            header_read_secs: 30,
            idle_secs: 300,
            shutdown_grace_secs: 30,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn response(&self) -> Duration {
        Duration::from_secs(self.response_secs)
    }

    pub fn tls_handshake(&self) -> Duration {
        Duration::from_secs(self.tls_handshake_secs)
    }

    pub fn header_read(&self) -> Duration {
        Duration::from_secs(self.header_read_secs)
    }

    pub fn idle(&self) -> Option<Duration> {
        (self.idle_secs > 0).then(|| Duration::from_secs(self.idle_secs))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Hot reload settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ReloadConfig {
    /// Quiet period after the last change before a reload runs.
    pub debounce_ms: u64,

    /// Fingerprint poll interval, a fallback for missed filesystem events.
    pub poll_interval_ms: u64,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 1000,
            poll_interval_ms: 100,
        }
    }
}

impl ReloadConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` overrides it.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Prometheus exporter bind address. Disabled when unset.
    pub metrics_address: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_address: None,
        }
    }
}
