//! rustls client configuration.

use std::sync::Arc;

use border0_core::{Border0Error, Border0Result};
use rustls::pki_types::CertificateDer;
use rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

/// Build a connector trusting the web PKI roots plus `extra_roots`.
pub fn connector(extra_roots: &[CertificateDer<'static>]) -> Border0Result<TlsConnector> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    for cert in extra_roots {
        roots
            .add(cert.clone())
            .map_err(|e| Border0Error::Config(format!("invalid root certificate: {e}")))?;
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| Border0Error::Tls(format!("TLS config error: {e}")))?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}
