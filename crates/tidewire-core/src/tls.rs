//! TLS client setup.
//!
//! Server certificates are always verified against the CA bundle supplied by
//! the [`crate::env::CertificateProvider`]. There is no option to skip
//! verification.

use std::{io::Cursor, sync::Arc};

use rustls::{ClientConfig, ClientConnection, RootCertStore, pki_types::ServerName};

use crate::error::ConnectionError;

/// Build a client configuration trusting exactly the certificates in
/// `ca_pem`.
pub(crate) fn client_config(ca_pem: &[u8]) -> Result<Arc<ClientConfig>, ConnectionError> {
    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut Cursor::new(ca_pem)) {
        roots.add(cert?)?;
    }
    if roots.is_empty() {
        return Err(ConnectionError::NoCertificates);
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(Arc::new(config))
}

/// Start a client session for `host`. No bytes are exchanged yet.
pub(crate) fn session(
    config: Arc<ClientConfig>,
    host: &str,
) -> Result<ClientConnection, ConnectionError> {
    let name = ServerName::try_from(host.to_string())
        .map_err(|_| ConnectionError::InvalidServerName { host: host.to_string() })?;
    Ok(ClientConnection::new(config, name)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_bundle_is_rejected() {
        assert!(matches!(client_config(b""), Err(ConnectionError::NoCertificates)));
    }

    #[test]
    fn garbage_bundle_is_rejected() {
        assert!(client_config(b"not a certificate").is_err());
    }

    #[test]
    fn invalid_server_name() {
        // Any config will do; the name check happens first.
        let roots = RootCertStore::empty();
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_root_certificates(roots)
            .with_no_client_auth();

        let result = session(Arc::new(config), "not a host name!");
        assert!(matches!(result, Err(ConnectionError::InvalidServerName { .. })));
    }
}
