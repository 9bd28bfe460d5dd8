//! Datagram Transport
//!
//! Fire-and-forget send, one-datagram-per-call receive. No retry, no
//! acknowledgement, no ordering and no deduplication: callers must assume
//! any datagram can be lost, duplicated or reordered.

use rand::Rng;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Mutex;
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::trace;

/// Receive buffer size. Anything larger is truncated and then fails decoding.
pub const RECV_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("send to {dest} failed: {source}")]
    Send {
        dest: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("receive failed: {0}")]
    Receive(#[source] io::Error),

    #[error("local address unavailable: {0}")]
    LocalAddr(#[source] io::Error),
}

/// Unreliable, connectionless, boundary-preserving transport
pub trait DatagramTransport: Send + Sync {
    /// Send one datagram. Success only means it was handed to the OS.
    fn send(
        &self,
        dest: SocketAddr,
        payload: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Wait for exactly one datagram
    fn receive(&self) -> impl Future<Output = Result<(SocketAddr, Vec<u8>), TransportError>> + Send;

    fn local_addr(&self) -> Result<SocketAddr, TransportError>;
}

/// UDP implementation backed by a tokio socket
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        Ok(Self { socket })
    }
}

impl DatagramTransport for UdpTransport {
    async fn send(&self, dest: SocketAddr, payload: &[u8]) -> Result<(), TransportError> {
        let sent = self
            .socket
            .send_to(payload, dest)
            .await
            .map_err(|source| TransportError::Send { dest, source })?;
        trace!("sent {} bytes to {}", sent, dest);
        Ok(())
    }

    async fn receive(&self) -> Result<(SocketAddr, Vec<u8>), TransportError> {
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        let (len, sender) = self
            .socket
            .recv_from(&mut buf)
            .await
            .map_err(TransportError::Receive)?;
        Ok((sender, buf[..len].to_vec()))
    }

    fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.socket.local_addr().map_err(TransportError::LocalAddr)
    }
}

/// Decorator that drops or duplicates outgoing datagrams at random.
/// Dropped datagrams still report success, as a real network would.
pub struct LossyTransport<T> {
    inner: T,
    drop_rate: f64,
    duplicate_rate: f64,
    rng: Mutex<rand::rngs::StdRng>,
}

impl<T: DatagramTransport> LossyTransport<T> {
    pub fn new(inner: T, drop_rate: f64, duplicate_rate: f64) -> Self {
        use rand::SeedableRng;
        Self {
            inner,
            drop_rate: drop_rate.clamp(0.0, 1.0),
            duplicate_rate: duplicate_rate.clamp(0.0, 1.0),
            rng: Mutex::new(rand::rngs::StdRng::from_entropy()),
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    fn roll(&self) -> (bool, bool) {
        // A poisoned lock only means another sender panicked mid-roll
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        let dropped = rng.gen_bool(self.drop_rate);
        let duplicated = rng.gen_bool(self.duplicate_rate);
        (dropped, duplicated)
    }
}

impl<T: DatagramTransport> DatagramTransport for LossyTransport<T> {
    async fn send(&self, dest: SocketAddr, payload: &[u8]) -> Result<(), TransportError> {
        let (dropped, duplicated) = self.roll();
        if dropped {
            trace!("simulated loss of datagram to {}", dest);
            return Ok(());
        }
        self.inner.send(dest, payload).await?;
        if duplicated {
            trace!("simulated duplicate of datagram to {}", dest);
            self.inner.send(dest, payload).await?;
        }
        Ok(())
    }

    async fn receive(&self) -> Result<(SocketAddr, Vec<u8>), TransportError> {
        self.inner.receive().await
    }

    fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.inner.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_preserves_datagram_boundaries() {
        let a = UdpTransport::bind(loopback()).await.unwrap();
        let b = UdpTransport::bind(loopback()).await.unwrap();
        let b_addr = b.local_addr().unwrap();

        a.send(b_addr, b"first").await.unwrap();
        a.send(b_addr, b"second-longer").await.unwrap();

        let (from, first) = b.receive().await.unwrap();
        assert_eq!(from, a.local_addr().unwrap());
        let (_, second) = b.receive().await.unwrap();

        // Loopback keeps order in practice; boundaries are what matters
        let mut got = vec![first, second];
        got.sort();
        assert_eq!(got, vec![b"first".to_vec(), b"second-longer".to_vec()]);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let a = UdpTransport::bind(loopback()).await.unwrap();
        let taken = a.local_addr().unwrap();
        let err = UdpTransport::bind(taken).await.unwrap_err();
        assert!(matches!(err, TransportError::Bind { .. }));
    }

    #[tokio::test]
    async fn test_lossy_transport_extremes() {
        let rx = UdpTransport::bind(loopback()).await.unwrap();
        let rx_addr = rx.local_addr().unwrap();

        let drop_all = LossyTransport::new(UdpTransport::bind(loopback()).await.unwrap(), 1.0, 0.0);
        drop_all.send(rx_addr, b"lost").await.unwrap();
        let nothing = tokio::time::timeout(Duration::from_millis(100), rx.receive()).await;
        assert!(nothing.is_err());

        let dup_all = LossyTransport::new(UdpTransport::bind(loopback()).await.unwrap(), 0.0, 1.0);
        dup_all.send(rx_addr, b"twice").await.unwrap();
        for _ in 0..2 {
            let (_, payload) = tokio::time::timeout(Duration::from_secs(1), rx.receive())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(payload, b"twice");
        }
    }
}
