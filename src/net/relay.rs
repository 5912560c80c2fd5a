//! Full-duplex byte relay for upgraded connections.
//!
//! # Design Decisions
//! - EOF on one side shuts down the write half of the other; the opposite
//!   direction keeps flowing until it ends too
//! - An error in either direction ends both
//! - The idle timeout counts traffic in both directions, so a stream that is
//!   quiet one way but busy the other stays open

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

const BUF_SIZE: usize = 16 * 1024;

/// Bytes moved by a finished relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub client_to_upstream: u64,
    pub upstream_to_client: u64,
}

/// Shared "last traffic" clock.
struct Activity {
    origin: Instant,
    last_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let elapsed = self.origin.elapsed().as_millis() as u64;
        self.last_ms.store(elapsed, Ordering::Relaxed);
    }

    /// Resolves once no traffic has been seen for `idle`.
    async fn idle_for(&self, idle: Duration) {
        loop {
            let last = self.origin + Duration::from_millis(self.last_ms.load(Ordering::Relaxed));
            let deadline = last + idle;
            if Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep_until(deadline).await;
        }
    }
}

/// Copy bytes both ways between `client` and `upstream` until both directions end.
pub async fn relay<C, U>(client: C, upstream: U, idle_timeout: Option<Duration>) -> io::Result<RelayStats>
where
    C: AsyncRead + AsyncWrite,
    U: AsyncRead + AsyncWrite,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);
    let activity = Activity::new();

    let pumps = async {
        tokio::try_join!(
            pump(&mut client_read, &mut upstream_write, &activity),
            pump(&mut upstream_read, &mut client_write, &activity),
        )
    };

    let (client_to_upstream, upstream_to_client) = match idle_timeout {
        Some(idle) => tokio::select! {
            result = pumps => result?,
            _ = activity.idle_for(idle) => {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "tunnel idle timeout"));
            }
        },
        None => pumps.await?,
    };

    Ok(RelayStats {
        client_to_upstream,
        upstream_to_client,
    })
}

async fn pump<R, W>(reader: &mut R, writer: &mut W, activity: &Activity) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUF_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            // The peer may already be gone; its own direction reports that.
            let _ = writer.shutdown().await;
            return Ok(total);
        }
        activity.touch();
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        total += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn relays_both_directions_and_half_closes() {
        let (mut client, proxy_client) = duplex(1024);
        let (proxy_upstream, mut upstream) = duplex(1024);
        let task = tokio::spawn(relay(proxy_client, proxy_upstream, None));

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        upstream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        upstream.write_all(b"pong!").await.unwrap();
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong!");

        // Client finishes sending; upstream sees EOF but can still answer.
        client.shutdown().await.unwrap();
        let mut rest = Vec::new();
        let mut upstream_read = [0u8; 16];
        assert_eq!(upstream.read(&mut upstream_read).await.unwrap(), 0);
        upstream.write_all(b"bye").await.unwrap();
        upstream.shutdown().await.unwrap();
        client.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"bye");

        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.client_to_upstream, 4);
        assert_eq!(stats.upstream_to_client, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_tunnel_is_closed() {
        let (_client, proxy_client) = duplex(64);
        let (proxy_upstream, _upstream) = duplex(64);

        let err = relay(proxy_client, proxy_upstream, Some(Duration::from_secs(30)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
