//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// A mock backend that answers every request with `marker|host|path`.
pub struct EchoBackend {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl EchoBackend {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

pub async fn start_echo_backend(marker: &'static str) -> EchoBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let counter = counter.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(socket);
                let mut request_line = String::new();
                if reader.read_line(&mut request_line).await.unwrap_or(0) == 0 {
                    return;
                }
                let path = request_line.split_whitespace().nth(1).unwrap_or("").to_string();

                let mut host = String::new();
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                        return;
                    }
                    let line = line.trim_end();
                    if line.is_empty() {
                        break;
                    }
                    if let Some((name, value)) = line.split_once(':') {
                        if name.eq_ignore_ascii_case("host") {
                            host = value.trim().to_string();
                        }
                    }
                }
                counter.fetch_add(1, Ordering::SeqCst);

                let body = format!("{marker}|{host}|{path}");
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let mut socket = reader.into_inner();
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    EchoBackend { addr, hits }
}

/// Read an HTTP message head, leaving any bytes after the blank line unread.
pub async fn read_head<S>(stream: &mut S) -> String
where
    S: AsyncRead + Unpin,
{
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte).await.unwrap_or(0) == 0 {
            break;
        }
        head.push(byte[0]);
    }
    String::from_utf8_lossy(&head).into_owned()
}

/// A backend that accepts any upgrade with 101, then echoes bytes back or stays silent.
pub async fn start_upgrade_backend(echo: bool) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let head = read_head(&mut socket).await;
                if !head.to_ascii_lowercase().contains("upgrade: websocket") {
                    let _ = socket
                        .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n")
                        .await;
                    return;
                }
                let _ = socket
                    .write_all(b"HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n")
                    .await;
                if echo {
                    let (mut reader, mut writer) = socket.split();
                    let _ = tokio::io::copy(&mut reader, &mut writer).await;
                } else {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
            });
        }
    });

    addr
}

/// A backend that promises a 100 byte body, sends 3 bytes, then goes quiet.
pub async fn start_stalled_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                read_head(&mut socket).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nabc")
                    .await;
                tokio::time::sleep(Duration::from_secs(60)).await;
                drop(socket);
            });
        }
    });

    addr
}

/// Send an upgrade request through the proxy and return the raw stream with the response head.
pub async fn upgrade_via(proxy: SocketAddr, host: &str) -> (TcpStream, String) {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    let request = format!(
        "GET /socket HTTP/1.1\r\nHost: {host}\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let head = read_head(&mut stream).await;
    (stream, head)
}

/// An address nothing is listening on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Certificate files written to disk, plus the DER the proxy should serve.
pub struct TestCert {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub der: Vec<u8>,
}

/// Temporary directory holding a config file and its certificates.
pub struct TestDir {
    dir: TempDir,
    pub config_path: PathBuf,
}

impl TestDir {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.yml");
        Self { dir, config_path }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Replace the config file atomically, the way editors and deploy tools do.
    pub fn write_config(&self, yaml: &str) {
        let tmp = self.dir.path().join(".config.yml.tmp");
        fs::write(&tmp, yaml).unwrap();
        fs::rename(&tmp, &self.config_path).unwrap();
    }

    /// Generate a self-signed certificate for `hostname` as `<stem>.crt` / `<stem>.key`.
    pub fn write_cert(&self, stem: &str, hostname: &str) -> TestCert {
        let certified = rcgen::generate_simple_self_signed(vec![hostname.to_string()]).unwrap();
        let cert_path = self.dir.path().join(format!("{stem}.crt"));
        let key_path = self.dir.path().join(format!("{stem}.key"));
        fs::write(&cert_path, certified.cert.pem()).unwrap();
        fs::write(&key_path, certified.key_pair.serialize_pem()).unwrap();
        TestCert {
            cert_path,
            key_path,
            der: certified.cert.der().to_vec(),
        }
    }
}

/// An HTTPS backend whose certificate for 127.0.0.1 is signed by a throwaway CA.
pub struct TlsBackend {
    pub addr: SocketAddr,
    pub ca_path: PathBuf,
}

impl TestDir {
    /// Start a TLS backend answering `secure|host|path`; the CA lands in this directory.
    pub async fn start_tls_backend(&self) -> TlsBackend {
        hostmux::net::tls::init_crypto_provider();

        let mut ca_params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        ca_params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "hostmux test CA");
        let ca_key = rcgen::KeyPair::generate().unwrap();
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();

        let leaf_key = rcgen::KeyPair::generate().unwrap();
        let leaf = rcgen::CertificateParams::new(vec!["127.0.0.1".to_string()])
            .unwrap()
            .signed_by(&leaf_key, &ca_cert, &ca_key)
            .unwrap();

        let ca_path = self.dir.path().join("upstream-ca.crt");
        fs::write(&ca_path, ca_cert.pem()).unwrap();

        let server_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(
                vec![leaf.der().clone()],
                PrivatePkcs8KeyDer::from(leaf_key.serialize_der()).into(),
            )
            .unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(server_config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    let Ok(mut tls) = acceptor.accept(socket).await else {
                        return;
                    };
                    let head = read_head(&mut tls).await;
                    let path = head.split_whitespace().nth(1).unwrap_or("").to_string();
                    let host = head
                        .lines()
                        .filter_map(|line| line.split_once(':'))
                        .find(|(name, _)| name.eq_ignore_ascii_case("host"))
                        .map(|(_, value)| value.trim().to_string())
                        .unwrap_or_default();
                    let body = format!("secure|{host}|{path}");
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = tls.write_all(response.as_bytes()).await;
                    let _ = tls.shutdown().await;
                });
            }
        });

        TlsBackend { addr, ca_path }
    }
}

/// YAML for one `hosts:` entry pointing at `backend`.
pub fn host_entry(hostname: &str, backend: SocketAddr) -> String {
    format!(
        "  \"{hostname}\":\n    ip: {}\n    port: {}\n    protocol: http\n",
        backend.ip(),
        backend.port()
    )
}

/// Like [`host_entry`], with a per-host certificate.
pub fn host_entry_with_tls(hostname: &str, backend: SocketAddr, cert: &TestCert) -> String {
    format!(
        "{}    tls:\n      cert_file: {}\n      key_file: {}\n",
        host_entry(hostname, backend),
        cert.cert_path.display(),
        cert.key_path.display()
    )
}

/// Common settings for tests: ephemeral ports and fast reloads.
pub fn base_config(ssl: bool) -> String {
    format!(
        "port: 0\nssl: {ssl}\nssl_port: 0\nbind_ip: 127.0.0.1\ntimeouts:\n  connect_secs: 2\n  shutdown_grace_secs: 2\nreload:\n  debounce_ms: 100\n  poll_interval_ms: 50\n"
    )
}

/// Plain HTTP settings with explicit idle and shutdown grace timeouts.
pub fn config_with_timeouts(idle_secs: u64, shutdown_grace_secs: u64) -> String {
    format!(
        "port: 0\nbind_ip: 127.0.0.1\ntimeouts:\n  connect_secs: 2\n  idle_secs: {idle_secs}\n  shutdown_grace_secs: {shutdown_grace_secs}\nreload:\n  debounce_ms: 100\n  poll_interval_ms: 50\n"
    )
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// GET `path` through the proxy's HTTP listener with the given Host.
pub async fn get_via(proxy: SocketAddr, host: &str, path: &str) -> reqwest::Response {
    http_client()
        .get(format!("http://{proxy}{path}"))
        .header("host", host)
        .send()
        .await
        .expect("proxy unreachable")
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Accepts any server certificate so tests can inspect which one was served.
#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

fn tls_connector() -> TlsConnector {
    hostmux::net::tls::init_crypto_provider();
    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

/// Result of one HTTPS request made with a raw TLS client.
pub struct TlsExchange {
    pub peer_cert: Vec<u8>,
    pub response: String,
}

impl TlsExchange {
    pub fn status(&self) -> u16 {
        self.response
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse().ok())
            .unwrap_or(0)
    }

    pub fn body(&self) -> &str {
        self.response.split_once("\r\n\r\n").map(|(_, body)| body).unwrap_or("")
    }
}

/// Handshake with `sni`, then send `GET path` with `Host: host` over HTTP/1.1.
///
/// Returns the handshake error if the proxy aborts it.
pub async fn tls_get(addr: SocketAddr, sni: &str, host: &str, path: &str) -> std::io::Result<TlsExchange> {
    let tcp = TcpStream::connect(addr).await?;
    let server_name = ServerName::try_from(sni.to_string())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let mut stream = tls_connector().connect(server_name, tcp).await?;

    let peer_cert = stream
        .get_ref()
        .1
        .peer_certificates()
        .and_then(|chain| chain.first())
        .map(|cert| cert.as_ref().to_vec())
        .unwrap_or_default();

    let request = format!("GET {path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;

    let mut raw = Vec::new();
    // The proxy may close without close_notify; keep what arrived.
    let _ = tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut raw)).await;

    Ok(TlsExchange {
        peer_cert,
        response: String::from_utf8_lossy(&raw).into_owned(),
    })
}
