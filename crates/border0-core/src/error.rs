use std::sync::Arc;

use thiserror::Error;

use crate::messages::{DialFailure, ErrorCode};

/// Errors produced by the Border0 SDK.
#[derive(Debug, Clone, Error)]
pub enum Border0Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(String),

    #[error("transient network error: {0}")]
    Transient(String),

    #[error("tls error: {0}")]
    Tls(String),

    #[error("dial failed ({reason}): {message}")]
    Dial { reason: DialFailure, message: String },

    #[error("listener closed")]
    QueueClosed,

    #[error("operation cancelled")]
    Cancelled,

    #[error("timeout")]
    Timeout,

    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("{0}")]
    Other(String),
}

impl Border0Error {
    /// Errors after which retrying with the same credentials cannot succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Auth(_) | Self::NotFound(_) | Self::UnsupportedVersion(_)
        )
    }

    /// Errors the control-plane client recovers from by reconnecting.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient(_)
                | Self::Tls(_)
                | Self::Timeout
                | Self::Io(_)
                | Self::Codec(_)
                | Self::InvalidMessage(_)
        )
    }

    /// Map an `Error` message received on the control stream.
    pub fn from_remote(code: ErrorCode, message: String) -> Self {
        match code {
            ErrorCode::Unauthorized => Self::Auth(message),
            ErrorCode::NotFound => Self::NotFound(message),
            ErrorCode::UnsupportedVersion => Self::UnsupportedVersion(message),
            ErrorCode::Unavailable | ErrorCode::Internal => Self::Transient(message),
        }
    }

    pub fn dial(reason: DialFailure, message: impl Into<String>) -> Self {
        Self::Dial {
            reason,
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for Border0Error {
    fn from(e: std::io::Error) -> Self {
        Border0Error::Io(Arc::new(e))
    }
}

impl From<ciborium::de::Error<std::io::Error>> for Border0Error {
    fn from(e: ciborium::de::Error<std::io::Error>) -> Self {
        Border0Error::Codec(e.to_string())
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for Border0Error {
    fn from(e: ciborium::ser::Error<std::io::Error>) -> Self {
        Border0Error::Codec(e.to_string())
    }
}

impl From<serde_json::Error> for Border0Error {
    fn from(e: serde_json::Error) -> Self {
        Border0Error::Codec(e.to_string())
    }
}

pub type Border0Result<T> = Result<T, Border0Error>;
