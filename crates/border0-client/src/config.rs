//! Listener configuration.

use std::collections::BTreeSet;
use std::time::Duration;

use border0_core::{Border0Error, Border0Result, SocketType};
use rustls::pki_types::CertificateDer;

use crate::backoff::BackoffConfig;

/// Environment variable consulted when no auth token is configured.
pub const AUTH_TOKEN_ENV: &str = "BORDER0_AUTH_TOKEN";
pub const DEFAULT_CONTROL_ENDPOINT: &str = "capitan.border0.com:443";
pub const DEFAULT_API_URL: &str = "https://api.border0.com/api/v1";
pub const DEFAULT_ACCEPT_QUEUE_DEPTH: usize = 64;

/// Configuration for [`crate::Listener::listen`].
///
/// Captured at construction; the listener never mutates it.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Name of the logical socket. Required.
    pub socket_name: String,
    pub socket_type: SocketType,
    /// Policies attached to the socket at startup.
    pub policy_names: BTreeSet<String>,
    /// Overrides `BORDER0_AUTH_TOKEN`.
    pub auth_token: Option<String>,
    /// Control-plane `host:port`.
    pub control_endpoint: String,
    /// Base URL of the management API.
    pub api_url: String,
    /// Use plain TCP for control and relay connections. Tests only.
    pub insecure_transport: bool,
    pub accept_queue_depth: usize,
    pub backoff: BackoffConfig,
    /// How long to wait for `Registered` after sending `Register`.
    pub register_timeout: Duration,
    /// Longest silence tolerated on the control stream.
    pub heartbeat_timeout: Duration,
    /// Total budget for one dial: relay connect, token exchange and enqueue.
    pub dial_timeout: Duration,
    /// How long `close()` waits for in-flight dials.
    pub drain_timeout: Duration,
    /// Trust anchors added to the bundled web PKI roots.
    pub root_certificates: Vec<CertificateDer<'static>>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            socket_name: String::new(),
            socket_type: SocketType::Http,
            policy_names: BTreeSet::new(),
            auth_token: None,
            control_endpoint: DEFAULT_CONTROL_ENDPOINT.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            insecure_transport: false,
            accept_queue_depth: DEFAULT_ACCEPT_QUEUE_DEPTH,
            backoff: BackoffConfig::default(),
            register_timeout: Duration::from_secs(15),
            heartbeat_timeout: Duration::from_secs(30),
            dial_timeout: Duration::from_secs(20),
            drain_timeout: Duration::from_secs(5),
            root_certificates: Vec::new(),
        }
    }
}

impl ListenerConfig {
    pub fn new(socket_name: impl Into<String>) -> Self {
        Self {
            socket_name: socket_name.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Border0Result<()> {
        if self.socket_name.trim().is_empty() {
            return Err(Border0Error::Config("socket name is required".into()));
        }
        if self.accept_queue_depth == 0 {
            return Err(Border0Error::Config(
                "accept queue depth must be a positive integer".into(),
            ));
        }
        if split_host_port(&self.control_endpoint).is_none() {
            return Err(Border0Error::Config(format!(
                "control endpoint must be host:port, got {:?}",
                self.control_endpoint
            )));
        }
        for (name, value) in [
            ("register timeout", self.register_timeout),
            ("heartbeat timeout", self.heartbeat_timeout),
            ("dial timeout", self.dial_timeout),
        ] {
            if value.is_zero() {
                return Err(Border0Error::Config(format!("{name} must be non-zero")));
            }
        }
        self.backoff.validate()
    }

    /// Explicit token first, then the environment.
    pub fn resolve_auth_token(&self) -> Border0Result<String> {
        resolve_token(self.auth_token.as_deref(), std::env::var(AUTH_TOKEN_ENV).ok())
    }

    /// Concurrent in-flight dials allowed.
    pub fn max_inflight_dials(&self) -> usize {
        self.accept_queue_depth.saturating_mul(2)
    }
}

fn resolve_token(explicit: Option<&str>, env: Option<String>) -> Border0Result<String> {
    explicit
        .map(str::to_string)
        .or(env)
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| {
            Border0Error::Config(format!(
                "no auth token: pass one explicitly or set {AUTH_TOKEN_ENV}"
            ))
        })
}

/// Split `host:port`, accepting bracketed IPv6 hosts.
pub(crate) fn split_host_port(addr: &str) -> Option<(&str, u16)> {
    let (host, port) = addr.rsplit_once(':')?;
    let port = port.parse().ok()?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() {
        return None;
    }
    Some((host, port))
}
