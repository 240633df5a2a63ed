//! The authenticated listener: `listen`, `accept`, `close`, `addr`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use border0_core::{Border0Result, SocketRef};

use crate::api::{ApiClient, SocketApi};
use crate::config::ListenerConfig;
use crate::control::{ControlClient, ControlTimings, SessionState, StateCell};
use crate::credentials::Credentials;
use crate::queue::AcceptQueue;
use crate::relay::RelayDialer;
use crate::stream::{InboundStream, ListenerAddr};
use crate::transport::Connector;

/// Slack on top of the drain deadline for the control task to finish.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// A passive endpoint bound to a Border0 socket.
///
/// Behaves like a local TCP listener: [`accept`](Self::accept) yields inbound
/// streams in arrival order until [`close`](Self::close) is called or the
/// control plane rejects the listener for good. Dropping the listener without
/// closing it cancels its background tasks.
pub struct Listener {
    addr: ListenerAddr,
    socket: SocketRef,
    queue: Arc<AcceptQueue<InboundStream>>,
    state: Arc<StateCell>,
    cancel: CancellationToken,
    control: Mutex<Option<JoinHandle<()>>>,
    drain_timeout: Duration,
    closed: AtomicBool,
}

impl Listener {
    /// Ensure the socket, attach policies, register with the control plane.
    ///
    /// Returns only once the control session is registered; any failure on
    /// the way is returned here and nothing keeps running.
    pub async fn listen(config: ListenerConfig) -> Border0Result<Self> {
        config.validate()?;
        let token = config.resolve_auth_token()?;
        let api = ApiClient::new(&config.api_url, token)?;
        Self::listen_with(config, &api).await
    }

    /// Like [`listen`](Self::listen) with a caller-supplied management API.
    pub async fn listen_with<A: SocketApi>(config: ListenerConfig, api: &A) -> Border0Result<Self> {
        config.validate()?;
        let token = config.resolve_auth_token()?;

        let (socket, created) = api
            .ensure_socket(&config.socket_name, config.socket_type)
            .await?;
        if socket.socket_type != config.socket_type {
            warn!(
                name = %socket.name,
                existing = %socket.socket_type,
                requested = %config.socket_type,
                "socket exists with a different type"
            );
        }
        info!(socket_id = %socket.socket_id, name = %socket.name, created, "socket ready");

        if !config.policy_names.is_empty() {
            let names: Vec<String> = config.policy_names.iter().cloned().collect();
            api.attach_policies(socket.socket_id, &names).await?;
            info!(socket_id = %socket.socket_id, policies = ?names, "policies attached");
        }

        let credentials = Credentials::builder()
            .token(token)
            .insecure_transport(config.insecure_transport)
            .build();
        let connector = Connector::new(
            credentials.requires_transport_security(),
            &config.root_certificates,
        )?;

        let addr = ListenerAddr::new(socket.name.clone(), socket.socket_type);
        let queue = Arc::new(AcceptQueue::new(config.accept_queue_depth));
        let state = Arc::new(StateCell::new(SessionState::Connecting));
        let cancel = CancellationToken::new();

        let mut control = ControlClient::new(
            config.control_endpoint.clone(),
            connector.clone(),
            credentials,
            socket.socket_id,
            ControlTimings {
                register: config.register_timeout,
                heartbeat: config.heartbeat_timeout,
                dial: config.dial_timeout,
                drain: config.drain_timeout,
                backoff: config.backoff,
            },
            RelayDialer::new(connector, addr.clone()),
            queue.clone(),
            config.max_inflight_dials(),
            state.clone(),
            cancel.clone(),
        );

        let session = match control.connect().await {
            Ok(session) => session,
            Err(e) => {
                state.set(SessionState::Closed);
                return Err(e);
            }
        };
        state.set(SessionState::Running);
        let handle = tokio::spawn(control.run(session));

        info!(addr = %addr, "listening");
        Ok(Self {
            addr,
            socket,
            queue,
            state,
            cancel,
            control: Mutex::new(Some(handle)),
            drain_timeout: config.drain_timeout,
            closed: AtomicBool::new(false),
        })
    }

    /// Wait for the next inbound stream.
    ///
    /// Fails with `QueueClosed` after [`close`](Self::close), or with the
    /// originating error if the control plane rejected the listener.
    pub async fn accept(&self) -> Border0Result<InboundStream> {
        self.queue.pop().await
    }

    /// Stop the control session, drain in-flight dials, and drop queued
    /// streams. Idempotent.
    pub async fn close(&self) -> Border0Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.cancel.cancel();
        self.queue.close().await;

        if let Some(handle) = self.control.lock().await.take() {
            let abort = handle.abort_handle();
            match tokio::time::timeout(self.drain_timeout + CLOSE_GRACE, handle).await {
                Err(_) => {
                    warn!("control task outlived the drain deadline, aborting");
                    abort.abort();
                }
                Ok(Err(e)) if e.is_panic() => error!(error = %e, "control task panicked"),
                Ok(_) => {}
            }
        }
        self.state.set(SessionState::Closed);
        info!(addr = %self.addr, "listener closed");
        Ok(())
    }

    /// Synthetic address naming the socket.
    pub fn addr(&self) -> &ListenerAddr {
        &self.addr
    }

    pub fn socket(&self) -> &SocketRef {
        &self.socket
    }

    /// Current state of the control session.
    pub fn state(&self) -> SessionState {
        self.state.get()
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("addr", &self.addr)
            .field("socket_id", &self.socket.socket_id)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Shorthand for [`Listener::listen`].
pub async fn listen(config: ListenerConfig) -> Border0Result<Listener> {
    Listener::listen(config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use border0_core::{Border0Error, SocketType};
    use std::sync::Mutex as StdMutex;
    use uuid::Uuid;

    /// Records calls; optionally fails `ensure_socket`.
    #[derive(Default)]
    struct FakeApi {
        fail_with: Option<Border0Error>,
        attached: StdMutex<Vec<String>>,
    }

    impl SocketApi for FakeApi {
        async fn ensure_socket(
            &self,
            name: &str,
            socket_type: SocketType,
        ) -> Border0Result<(SocketRef, bool)> {
            if let Some(e) = &self.fail_with {
                return Err(e.clone());
            }
            Ok((
                SocketRef {
                    socket_id: Uuid::from_u128(1),
                    name: name.to_string(),
                    socket_type,
                },
                true,
            ))
        }

        async fn attach_policies(&self, _socket_id: Uuid, names: &[String]) -> Border0Result<()> {
            self.attached.lock().unwrap().extend_from_slice(names);
            Ok(())
        }
    }

    fn config() -> ListenerConfig {
        let mut cfg = ListenerConfig::new("s1");
        cfg.auth_token = Some("T".into());
        cfg.insecure_transport = true;
        cfg
    }

    #[tokio::test]
    async fn invalid_config_fails_before_api() {
        let api = FakeApi {
            fail_with: Some(Border0Error::Other("must not be called".into())),
            ..Default::default()
        };
        let err = Listener::listen_with(ListenerConfig::new(""), &api)
            .await
            .unwrap_err();
        assert!(matches!(err, Border0Error::Config(_)));
    }

    #[tokio::test]
    async fn api_failure_aborts_startup() {
        let api = FakeApi {
            fail_with: Some(Border0Error::NotFound("socket".into())),
            ..Default::default()
        };
        let err = Listener::listen_with(config(), &api).await.unwrap_err();
        assert!(matches!(err, Border0Error::NotFound(_)));
    }

    #[tokio::test]
    async fn unreachable_control_plane_fails_startup() {
        // Bind then drop to get a port with nothing listening.
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let mut cfg = config();
        cfg.control_endpoint = format!("127.0.0.1:{port}");
        cfg.policy_names.insert("p1".into());
        let api = FakeApi::default();
        let err = Listener::listen_with(cfg, &api).await.unwrap_err();
        assert!(matches!(err, Border0Error::Transient(_)));
        assert_eq!(*api.attached.lock().unwrap(), vec!["p1".to_string()]);
    }
}
