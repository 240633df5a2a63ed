//! Per-request credential metadata for the control plane.

use std::collections::BTreeMap;
use std::fmt;

pub const METADATA_TOKEN: &str = "token";
pub const METADATA_CONNECTOR_ID: &str = "connector_id";

/// Credentials attached to every control-plane registration.
///
/// A plain value: the control-plane client holds its own copy and updates the
/// connector id once the platform assigns one.
#[derive(Clone, Default)]
pub struct Credentials {
    token: Option<String>,
    connector_id: Option<String>,
    insecure_transport: bool,
}

impl Credentials {
    pub fn builder() -> CredentialsBuilder {
        CredentialsBuilder::default()
    }

    /// Metadata map sent with outgoing control requests. Empty values are omitted.
    pub fn metadata(&self) -> BTreeMap<String, String> {
        let mut md = BTreeMap::new();
        if let Some(token) = self.token.as_deref().filter(|t| !t.is_empty()) {
            md.insert(METADATA_TOKEN.to_string(), token.to_string());
        }
        if let Some(id) = self.connector_id.as_deref().filter(|c| !c.is_empty()) {
            md.insert(METADATA_CONNECTOR_ID.to_string(), id.to_string());
        }
        md
    }

    pub fn requires_transport_security(&self) -> bool {
        !self.insecure_transport
    }

    pub fn connector_id(&self) -> Option<&str> {
        self.connector_id.as_deref()
    }

    pub(crate) fn set_connector_id(&mut self, id: impl Into<String>) {
        self.connector_id = Some(id.into());
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("connector_id", &self.connector_id)
            .field("insecure_transport", &self.insecure_transport)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct CredentialsBuilder {
    inner: Credentials,
}

impl CredentialsBuilder {
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.inner.token = Some(token.into());
        self
    }

    pub fn connector_id(mut self, id: impl Into<String>) -> Self {
        self.inner.connector_id = Some(id.into());
        self
    }

    pub fn insecure_transport(mut self, insecure: bool) -> Self {
        self.inner.insecure_transport = insecure;
        self
    }

    pub fn build(self) -> Credentials {
        self.inner
    }
}
