//! Socket data model shared by the API facade and the listener.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Border0Error;

/// Kind of traffic a socket carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketType {
    #[default]
    Http,
    Ssh,
    Database,
    Tls,
}

impl SocketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Ssh => "ssh",
            Self::Database => "database",
            Self::Tls => "tls",
        }
    }
}

impl fmt::Display for SocketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SocketType {
    type Err = Border0Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "ssh" => Ok(Self::Ssh),
            "database" => Ok(Self::Database),
            "tls" => Ok(Self::Tls),
            other => Err(Border0Error::Config(format!(
                "unsupported socket type: {other} (expected http, ssh, database, or tls)"
            ))),
        }
    }
}

/// A socket as known to the platform. Fixed for the lifetime of a listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketRef {
    pub socket_id: Uuid,
    pub name: String,
    pub socket_type: SocketType,
}
