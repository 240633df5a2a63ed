//! Data-plane dials: one relay connection per `DialRequest`.
//!
//! Handshake: send `[u32 BE length][relay_token]`, read one status byte.
//! On `RelayStatus::Ok` the connection becomes an [`InboundStream`].

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use border0_core::messages::DialRequestPayload;
use border0_core::{frame_bytes, Border0Error, Border0Result, DialFailure, RelayStatus};

use crate::stream::{InboundStream, ListenerAddr};
use crate::transport::Connector;

/// Turns dial requests into inbound streams.
#[derive(Clone)]
pub struct RelayDialer {
    connector: Connector,
    local: ListenerAddr,
}

impl RelayDialer {
    pub fn new(connector: Connector, local: ListenerAddr) -> Self {
        Self { connector, local }
    }

    /// Connect to the relay and complete the token exchange.
    ///
    /// Not bounded in time; callers apply the per-dial deadline. The relay
    /// rejecting the listener's credentials is [`Border0Error::Auth`]; every
    /// other error is a [`Border0Error::Dial`]. The connection is dropped
    /// before returning.
    pub async fn dial(&self, req: &DialRequestPayload) -> Border0Result<InboundStream> {
        let (mut conn, relay_peer) = self
            .connector
            .connect(&req.relay_address)
            .await
            .map_err(|e| match e {
                Border0Error::Tls(msg) => Border0Error::dial(DialFailure::Tls, msg),
                other => Border0Error::dial(DialFailure::RelayUnreachable, other.to_string()),
            })?;

        let frame = frame_bytes(&req.relay_token)
            .map_err(|e| Border0Error::dial(DialFailure::Protocol, e.to_string()))?;
        conn.write_all(&frame)
            .await
            .map_err(|e| Border0Error::dial(DialFailure::RelayUnreachable, e.to_string()))?;
        conn.flush()
            .await
            .map_err(|e| Border0Error::dial(DialFailure::RelayUnreachable, e.to_string()))?;

        let status = conn.read_u8().await.map_err(|e| {
            Border0Error::dial(DialFailure::Protocol, format!("reading relay status: {e}"))
        })?;

        match RelayStatus::try_from(status) {
            Ok(RelayStatus::Ok) => {
                debug!(request_id = %req.request_id, relay = %relay_peer, "relay accepted token");
                Ok(InboundStream::new(
                    conn,
                    req.request_id,
                    self.local.clone(),
                    relay_peer,
                    req.peer_hint.clone(),
                ))
            }
            Ok(RelayStatus::Refused) => Err(Border0Error::dial(
                DialFailure::RelayRefused,
                "relay refused token",
            )),
            Ok(RelayStatus::Unauthorized) => {
                Err(Border0Error::Auth("relay rejected credentials".into()))
            }
            Err(msg) => Err(Border0Error::dial(DialFailure::Protocol, msg)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use border0_core::SocketType;
    use tokio::net::TcpListener;
    use uuid::Uuid;

    /// Relay that checks the framed token and answers `status`.
    async fn fake_relay(status: u8) -> (String, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let len = sock.read_u32().await.unwrap() as usize;
            let mut token = vec![0u8; len];
            sock.read_exact(&mut token).await.unwrap();
            sock.write_u8(status).await.unwrap();
            if status == 0 {
                sock.write_all(b"hello").await.unwrap();
            }
            token
        });
        (addr, handle)
    }

    fn dialer() -> RelayDialer {
        RelayDialer::new(
            Connector::new(false, &[]).unwrap(),
            ListenerAddr::new("s1", SocketType::Http),
        )
    }

    fn request(addr: String) -> DialRequestPayload {
        DialRequestPayload {
            request_id: Uuid::from_u128(1),
            relay_address: addr,
            relay_token: vec![0xAA],
            peer_hint: None,
        }
    }

    #[tokio::test]
    async fn accepted_token_yields_stream() {
        let (addr, relay) = fake_relay(0x00).await;
        let mut stream = dialer().dial(&request(addr.clone())).await.unwrap();

        assert_eq!(stream.remote_addr().to_string(), addr);
        assert_eq!(stream.request_id(), Uuid::from_u128(1));

        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
        assert_eq!(relay.await.unwrap(), vec![0xAA]);
    }

    #[tokio::test]
    async fn refused_token() {
        let (addr, _relay) = fake_relay(0x01).await;
        let err = dialer().dial(&request(addr)).await.unwrap_err();
        assert!(matches!(
            err,
            Border0Error::Dial {
                reason: DialFailure::RelayRefused,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn unauthorized_status_is_an_auth_error() {
        let (addr, _relay) = fake_relay(0x02).await;
        let err = dialer().dial(&request(addr)).await.unwrap_err();
        assert!(matches!(err, Border0Error::Auth(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn unknown_status_is_protocol_error() {
        let (addr, _relay) = fake_relay(0x42).await;
        let err = dialer().dial(&request(addr)).await.unwrap_err();
        assert!(matches!(
            err,
            Border0Error::Dial {
                reason: DialFailure::Protocol,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn unreachable_relay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = dialer().dial(&request(addr)).await.unwrap_err();
        assert!(matches!(
            err,
            Border0Error::Dial {
                reason: DialFailure::RelayUnreachable,
                ..
            }
        ));
    }
}
