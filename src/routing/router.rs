//! Route table and routing decisions.
//!
//! # Responsibilities
//! - Store validated host entries in config order
//! - Look up the entry for a normalized hostname
//! - Expose per-host TLS material to the certificate store
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(1) host lookup via HashMap index into an ordered Vec
//! - Duplicate hostnames are refused at construction
//! - Explicit no-match (`None`) rather than a silent default host

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// Protocol used to reach a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    /// Parse the `protocol` field of a host entry.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "http" => Some(Protocol::Http),
            "https" => Some(Protocol::Https),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }

    /// Whether the backend connection is wrapped in TLS.
    pub fn is_tls(&self) -> bool {
        matches!(self, Protocol::Https)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One upstream target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    /// IP address or resolvable name.
    pub ip: String,
    pub port: u16,
    pub protocol: Protocol,
}

impl Backend {
    pub fn new(ip: impl Into<String>, port: u16, protocol: Protocol) -> Self {
        Self {
            ip: ip.into(),
            port,
            protocol,
        }
    }

    /// `host:port`, bracketing bare IPv6 addresses.
    pub fn authority(&self) -> String {
        if self.ip.contains(':') && !self.ip.starts_with('[') {
            format!("[{}]:{}", self.ip, self.port)
        } else {
            format!("{}:{}", self.ip, self.port)
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol, self.authority())
    }
}

/// A dedicated certificate/key pair for one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPair {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

impl TlsPair {
    pub fn new(cert_file: impl Into<PathBuf>, key_file: impl Into<PathBuf>) -> Self {
        Self {
            cert_file: cert_file.into(),
            key_file: key_file.into(),
        }
    }
}

/// A routable host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    hostname: String,
    backend: Backend,
    tls: Option<TlsPair>,
}

impl HostEntry {
    /// Create an entry. The hostname is lower-cased and loses any trailing dot.
    pub fn new(hostname: &str, backend: Backend, tls: Option<TlsPair>) -> Self {
        Self {
            hostname: hostname.trim_end_matches('.').to_ascii_lowercase(),
            backend,
            tls,
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn tls(&self) -> Option<&TlsPair> {
        self.tls.as_ref()
    }
}

/// Returned when two entries normalize to the same hostname.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("duplicate hostname `{0}`")]
pub struct DuplicateHost(pub String);

/// Insertion-ordered hostname → entry mapping.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    entries: Vec<HostEntry>,
    index: HashMap<String, usize>,
}

impl RouteTable {
    /// Build a table from entries in config order.
    pub fn new(entries: Vec<HostEntry>) -> Result<Self, DuplicateHost> {
        let mut index = HashMap::with_capacity(entries.len());
        for (position, entry) in entries.iter().enumerate() {
            if index.insert(entry.hostname.clone(), position).is_some() {
                return Err(DuplicateHost(entry.hostname.clone()));
            }
        }
        Ok(Self { entries, index })
    }

    /// Find the entry for a hostname. Matching is case-insensitive.
    pub fn lookup(&self, hostname: &str) -> Option<&HostEntry> {
        let position = match self.index.get(hostname) {
            Some(position) => *position,
            None => *self.index.get(&hostname.to_ascii_lowercase())?,
        };
        self.entries.get(position)
    }

    /// Entries in config order.
    pub fn iter(&self) -> impl Iterator<Item = &HostEntry> {
        self.entries.iter()
    }

    /// First entry (in config order) that carries its own certificate.
    pub fn first_with_tls(&self) -> Option<&HostEntry> {
        self.entries.iter().find(|entry| entry.tls.is_some())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
