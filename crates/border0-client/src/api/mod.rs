//! Management API facade.
//!
//! The listener needs two idempotent operations at startup: make sure the
//! socket exists and attach the configured policies. [`SocketApi`] is that
//! seam; [`ApiClient`] implements it against the Border0 REST API.

mod client;
mod types;

use std::future::Future;

use uuid::Uuid;

use border0_core::{Border0Result, SocketRef, SocketType};

pub use client::{ApiClient, DEFAULT_API_RETRIES, DEFAULT_PAGE_SIZE};
pub use types::{CreateSocket, Policy, PolicyAction, PolicyUpdate};

/// Startup operations the listener consumes from the management API.
pub trait SocketApi: Send + Sync {
    /// Fetch the socket by name, creating it if missing.
    ///
    /// Returns the socket and whether it was created by this call.
    fn ensure_socket(
        &self,
        name: &str,
        socket_type: SocketType,
    ) -> impl Future<Output = Border0Result<(SocketRef, bool)>> + Send;

    /// Attach each named policy to the socket. Already-attached is success.
    fn attach_policies(
        &self,
        socket_id: Uuid,
        names: &[String],
    ) -> impl Future<Output = Border0Result<()>> + Send;
}
