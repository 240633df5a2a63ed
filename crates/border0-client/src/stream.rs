//! Inbound streams handed to `accept()` callers.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use uuid::Uuid;

use border0_core::SocketType;

use crate::transport::BoxedStream;

/// Synthetic local address of a listener: the socket it serves, never a real
/// TCP address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerAddr {
    socket_name: String,
    socket_type: SocketType,
}

impl ListenerAddr {
    pub fn new(socket_name: impl Into<String>, socket_type: SocketType) -> Self {
        Self {
            socket_name: socket_name.into(),
            socket_type,
        }
    }

    pub fn network(&self) -> &'static str {
        "border0"
    }

    pub fn socket_name(&self) -> &str {
        &self.socket_name
    }

    pub fn socket_type(&self) -> SocketType {
        self.socket_type
    }
}

impl fmt::Display for ListenerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "border0://{}/{}", self.socket_type, self.socket_name)
    }
}

/// One accepted data-plane connection.
///
/// Reads and writes go straight to the relay connection. The caller owns it;
/// dropping it closes the connection.
pub struct InboundStream {
    inner: BoxedStream,
    request_id: Uuid,
    local: ListenerAddr,
    remote: SocketAddr,
    peer_hint: Option<String>,
}

impl InboundStream {
    pub(crate) fn new(
        inner: BoxedStream,
        request_id: Uuid,
        local: ListenerAddr,
        relay_peer: SocketAddr,
        peer_hint: Option<String>,
    ) -> Self {
        // A hint that parses as a socket address names the real client.
        let remote = peer_hint
            .as_deref()
            .and_then(|h| h.parse().ok())
            .unwrap_or(relay_peer);
        Self {
            inner,
            request_id,
            local,
            remote,
            peer_hint,
        }
    }

    /// The dial request this stream answered.
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn local_addr(&self) -> &ListenerAddr {
        &self.local
    }

    /// The platform's peer hint when it is a socket address, else the relay peer.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// The raw peer hint supplied by the platform, if any.
    pub fn peer_hint(&self) -> Option<&str> {
        self.peer_hint.as_deref()
    }

    /// Flush and shut down the write side, then release the connection.
    pub async fn close(mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }
}

impl fmt::Debug for InboundStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundStream")
            .field("request_id", &self.request_id)
            .field("local", &self.local.to_string())
            .field("remote", &self.remote)
            .field("peer_hint", &self.peer_hint)
            .finish()
    }
}

impl AsyncRead for InboundStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for InboundStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut *self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.inner).poll_shutdown(cx)
    }
}
