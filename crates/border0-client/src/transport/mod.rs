//! Outbound connections for the control plane and relays.
//!
//! Transport security is used unless the listener was configured with
//! `insecure_transport`, in which case connections are plain TCP.

pub mod tls;

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use border0_core::{Border0Error, Border0Result};
use rustls::pki_types::{CertificateDer, ServerName};

use crate::config::split_host_port;

/// A full-duplex byte stream: plain TCP or TLS over TCP.
pub trait NetStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> NetStream for T {}

pub type BoxedStream = Box<dyn NetStream>;

/// Opens TCP connections, upgrading them to TLS when required.
#[derive(Clone)]
pub struct Connector {
    tls: Option<TlsConnector>,
}

impl Connector {
    pub fn new(
        requires_transport_security: bool,
        extra_roots: &[CertificateDer<'static>],
    ) -> Border0Result<Self> {
        let tls = if requires_transport_security {
            Some(tls::connector(extra_roots)?)
        } else {
            None
        };
        Ok(Self { tls })
    }

    pub fn is_secure(&self) -> bool {
        self.tls.is_some()
    }

    /// Connect to `host:port`. Returns the stream and the peer's socket address.
    pub async fn connect(&self, addr: &str) -> Border0Result<(BoxedStream, SocketAddr)> {
        let (host, _port) = split_host_port(addr)
            .ok_or_else(|| Border0Error::Config(format!("invalid address: {addr}")))?;

        let tcp = TcpStream::connect(addr)
            .await
            .map_err(|e| Border0Error::Transient(format!("connect {addr}: {e}")))?;
        let _ = tcp.set_nodelay(true);
        let peer = tcp.peer_addr()?;

        let Some(tls) = &self.tls else {
            debug!(addr, peer = %peer, "connected (plaintext)");
            return Ok((Box::new(tcp), peer));
        };

        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| Border0Error::Config(format!("invalid server name: {host}")))?;
        let stream = tls
            .connect(server_name, tcp)
            .await
            .map_err(|e| Border0Error::Tls(format!("handshake with {addr}: {e}")))?;

        debug!(addr, peer = %peer, "connected (tls)");
        Ok((Box::new(stream), peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn plaintext_connect_reports_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"hi").await.unwrap();
        });

        let connector = Connector::new(false, &[]).unwrap();
        assert!(!connector.is_secure());
        let (mut stream, peer) = connector.connect(&addr.to_string()).await.unwrap();
        assert_eq!(peer, addr);

        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
    }

    #[tokio::test]
    async fn refused_connection_is_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = Connector::new(false, &[]).unwrap();
        let err = connector.connect(&addr.to_string()).await.err().unwrap();
        assert!(err.is_retryable(), "{err}");
    }

    #[tokio::test]
    async fn malformed_address_is_config_error() {
        let connector = Connector::new(false, &[]).unwrap();
        let err = connector.connect("nowhere").await.err().unwrap();
        assert!(matches!(err, Border0Error::Config(_)));
    }
}
