//! border0-client: Rust client library for Border0.
//!
//! Opens an authenticated listener bound to a named socket. The listener
//! registers with the Border0 control plane, dials a relay for every inbound
//! connection the platform announces, and hands the resulting byte streams to
//! the embedding server through an `accept()` loop.
//!
//! # Quick Start
//!
//! ```no_run
//! use border0_client::{listen, ListenerConfig};
//! use tokio::io::AsyncWriteExt;
//!
//! # async fn example() -> border0_core::Border0Result<()> {
//! let mut config = ListenerConfig::new("my-service");
//! config.policy_names.insert("allow-engineering".into());
//!
//! let listener = listen(config).await?;
//! println!("listening on {}", listener.addr());
//!
//! loop {
//!     let mut stream = listener.accept().await?;
//!     tokio::spawn(async move {
//!         let _ = stream.write_all(b"hello\n").await;
//!         let _ = stream.close().await;
//!     });
//! }
//! # }
//! ```

pub mod api;
pub mod backoff;
pub mod config;
mod control;
pub mod credentials;
pub mod listener;
pub mod queue;
pub mod relay;
pub mod stream;
pub mod transport;

// Re-export primary public types.
pub use api::{ApiClient, SocketApi};
pub use backoff::BackoffConfig;
pub use config::{ListenerConfig, AUTH_TOKEN_ENV};
pub use control::SessionState;
pub use credentials::Credentials;
pub use listener::{listen, Listener};
pub use queue::{AcceptQueue, PushError};
pub use stream::{InboundStream, ListenerAddr};

// Re-export border0-core error types for convenience.
pub use border0_core::{Border0Error, Border0Result, SocketRef, SocketType};
