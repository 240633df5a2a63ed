//! Loopback fakes for the control plane, relays and management API.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use uuid::Uuid;

use border0_client::transport::BoxedStream;
use border0_client::{BackoffConfig, Border0Result, ListenerConfig, SocketApi, SocketRef, SocketType};
use border0_core::messages::{DialRequestPayload, DialResultPayload, RegisterPayload, RegisteredPayload};
use border0_core::{frame_encode, ControlMessage, FrameDecoder};

pub const STEP: Duration = Duration::from_secs(5);
pub const SOCKET_ID: Uuid = Uuid::from_u128(1);

/// Management API that always returns socket `00000000-…-0001`.
pub struct StaticApi;

impl SocketApi for StaticApi {
    async fn ensure_socket(
        &self,
        name: &str,
        socket_type: SocketType,
    ) -> Border0Result<(SocketRef, bool)> {
        Ok((
            SocketRef {
                socket_id: SOCKET_ID,
                name: name.to_string(),
                socket_type,
            },
            false,
        ))
    }

    async fn attach_policies(&self, _socket_id: Uuid, _names: &[String]) -> Border0Result<()> {
        Ok(())
    }
}

/// Plain-TCP listener config with short timers.
pub fn config(control: &FakeControl) -> ListenerConfig {
    let mut cfg = ListenerConfig::new("s1");
    cfg.auth_token = Some("T".into());
    cfg.insecure_transport = true;
    cfg.control_endpoint = control.addr.clone();
    cfg.backoff = BackoffConfig {
        base: Duration::from_millis(20),
        cap: Duration::from_millis(100),
        jitter: 0.5,
    };
    cfg.register_timeout = Duration::from_secs(2);
    cfg.drain_timeout = Duration::from_secs(2);
    cfg
}

/// Self-signed certificate for `localhost` and an acceptor serving it.
pub fn tls_identity() -> (CertificateDer<'static>, TlsAcceptor) {
    let issued = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert = issued.cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(issued.key_pair.serialize_der()));

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![cert.clone()], key)
        .unwrap();
    (cert, TlsAcceptor::from(Arc::new(config)))
}

pub struct FakeControl {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    pub addr: String,
}

impl FakeControl {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        Self {
            listener,
            tls: None,
            addr,
        }
    }

    /// Control plane behind TLS, addressed as `localhost:port`.
    pub async fn bind_tls(acceptor: TlsAcceptor) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        Self {
            listener,
            tls: Some(acceptor),
            addr: format!("localhost:{port}"),
        }
    }

    pub async fn accept(&self) -> ControlConn {
        let (tcp, _) = tokio::time::timeout(STEP, self.listener.accept())
            .await
            .expect("no control connection")
            .unwrap();
        let stream: BoxedStream = match &self.tls {
            Some(acceptor) => Box::new(acceptor.accept(tcp).await.unwrap()),
            None => Box::new(tcp),
        };
        ControlConn {
            stream,
            decoder: FrameDecoder::new(),
            pending: VecDeque::new(),
        }
    }

    /// Panics if anything connects within `wait`.
    pub async fn expect_no_connection(&self, wait: Duration) {
        if let Ok(accepted) = tokio::time::timeout(wait, self.listener.accept()).await {
            panic!("unexpected control connection: {:?}", accepted.map(|(_, peer)| peer));
        }
    }

    /// Accept a connection, read `Register`, answer `Registered`.
    pub async fn accept_registered(&self, connector_id: Uuid) -> (ControlConn, RegisterPayload) {
        let mut conn = self.accept().await;
        let register = match conn.recv().await {
            ControlMessage::Register(r) => r,
            other => panic!("expected register, got {other:?}"),
        };
        conn.send(&ControlMessage::Registered(RegisteredPayload { connector_id }))
            .await;
        (conn, register)
    }
}

pub struct ControlConn {
    stream: BoxedStream,
    decoder: FrameDecoder,
    pending: VecDeque<ControlMessage>,
}

impl ControlConn {
    pub async fn send(&mut self, msg: &ControlMessage) {
        let frame = frame_encode(msg).unwrap();
        self.stream.write_all(&frame).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    pub async fn recv(&mut self) -> ControlMessage {
        self.try_recv(STEP).await.expect("no control message")
    }

    /// `None` on timeout or EOF.
    pub async fn try_recv(&mut self, wait: Duration) -> Option<ControlMessage> {
        let deadline = tokio::time::Instant::now() + wait;
        let mut buf = [0u8; 4096];
        loop {
            if let Some(msg) = self.pending.pop_front() {
                return Some(msg);
            }
            let n = tokio::time::timeout_at(deadline, self.stream.read(&mut buf))
                .await
                .ok()?
                .ok()?;
            if n == 0 {
                return None;
            }
            let msgs = self.decoder.feed::<ControlMessage>(&buf[..n]).unwrap();
            self.pending.extend(msgs);
        }
    }

    /// Next `DialResult`, skipping heartbeat acks.
    pub async fn dial_result(&mut self) -> DialResultPayload {
        loop {
            match self.recv().await {
                ControlMessage::DialResult(r) => return r,
                ControlMessage::HeartbeatAck(_) => continue,
                other => panic!("expected dial result, got {other:?}"),
            }
        }
    }

    pub async fn dial(&mut self, request_id: Uuid, relay: &str) {
        self.send(&ControlMessage::DialRequest(DialRequestPayload {
            request_id,
            relay_address: relay.to_string(),
            relay_token: vec![0xAA],
            peer_hint: None,
        }))
        .await;
    }
}

/// How a fake relay answers the token frame.
#[derive(Debug, Clone, Copy)]
pub enum RelayMode {
    /// Send this status byte, then echo until EOF.
    Status(u8),
    /// Wait, then send this status byte and echo until EOF.
    Delayed(u8, Duration),
    /// Read the token and never answer.
    Silent,
}

/// Relay serving any number of connections. Yields each received token.
pub async fn fake_relay(mode: RelayMode) -> (String, tokio::sync::mpsc::UnboundedReceiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                return;
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                let Ok(len) = sock.read_u32().await else { return };
                let mut token = vec![0u8; len as usize];
                if sock.read_exact(&mut token).await.is_err() {
                    return;
                }
                let _ = tx.send(token);
                let mode = match mode {
                    RelayMode::Delayed(status, wait) => {
                        tokio::time::sleep(wait).await;
                        RelayMode::Status(status)
                    }
                    other => other,
                };
                match mode {
                    RelayMode::Status(status) => {
                        if sock.write_u8(status).await.is_err() || status != 0 {
                            return;
                        }
                        let (mut r, mut w) = sock.split();
                        let _ = tokio::io::copy(&mut r, &mut w).await;
                    }
                    RelayMode::Silent | RelayMode::Delayed(..) => {
                        let mut sink = [0u8; 64];
                        while matches!(sock.read(&mut sink).await, Ok(n) if n > 0) {}
                    }
                }
            });
        }
    });
    (addr, rx)
}

/// Relay that records when each connection is closed by the client.
pub async fn silent_relay_with_eof() -> (String, tokio::sync::mpsc::UnboundedReceiver<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let _: JoinHandle<()> = tokio::spawn(async move {
        while let Ok((mut sock, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut sink = [0u8; 64];
                while matches!(sock.read(&mut sink).await, Ok(n) if n > 0) {}
                let _ = tx.send(());
            });
        }
    });
    (addr, rx)
}
