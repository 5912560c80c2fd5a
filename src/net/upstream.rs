//! Backend connection establishment.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::routing::Backend;

/// Byte stream to a backend, plain or TLS.
pub trait UpstreamIo: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> UpstreamIo for T {}

pub type UpstreamStream = Box<dyn UpstreamIo>;

/// Failure to reach a backend.
#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("connect to {addr} timed out after {timeout:?}")]
    Timeout { addr: String, timeout: Duration },

    #[error("TLS handshake with {addr} failed: {source}")]
    Tls {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("`{0}` is not a valid TLS server name")]
    ServerName(String),
}

impl DialError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, DialError::Timeout { .. })
    }
}

/// Opens one connection per call; no pooling, no retry.
#[derive(Clone)]
pub struct UpstreamConnector {
    tls: TlsConnector,
}

impl UpstreamConnector {
    pub fn new(client_config: Arc<ClientConfig>) -> Self {
        Self {
            tls: TlsConnector::from(client_config),
        }
    }

    /// Dial `backend`, wrapping the stream in TLS for `https` backends.
    ///
    /// `timeout` covers TCP connect and TLS handshake together.
    pub async fn connect(&self, backend: &Backend, timeout: Duration) -> Result<UpstreamStream, DialError> {
        let addr = backend.authority();

        let dial = async {
            let tcp = TcpStream::connect(addr.as_str())
                .await
                .map_err(|source| DialError::Connect {
                    addr: addr.clone(),
                    source,
                })?;
            let _ = tcp.set_nodelay(true);

            if !backend.protocol.is_tls() {
                return Ok(Box::new(tcp) as UpstreamStream);
            }

            let server_name = ServerName::try_from(backend.ip.clone())
                .map_err(|_| DialError::ServerName(backend.ip.clone()))?;
            let tls = self
                .tls
                .connect(server_name, tcp)
                .await
                .map_err(|source| DialError::Tls {
                    addr: addr.clone(),
                    source,
                })?;
            Ok(Box::new(tls) as UpstreamStream)
        };

        tokio::time::timeout(timeout, dial)
            .await
            .map_err(|_| DialError::Timeout {
                addr: addr.clone(),
                timeout,
            })?
    }
}
