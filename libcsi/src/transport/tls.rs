//! rustls configuration for the QUIC transport.
//!
//! Both sides pin the `ring` provider and TLS 1.3, which QUIC requires, so
//! the result does not depend on a process-wide default provider.

use std::path::Path;
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore, ServerConfig};

use crate::error::CsiError;

/// ALPN protocol spoken on every CSI stream.
pub const ALPN: &[u8] = b"csi-json";

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn tls_error<E: std::fmt::Display>(context: &str) -> impl FnOnce(E) -> CsiError + '_ {
    move |e| CsiError::TransportError(format!("{context}: {e}"))
}

/// Server configuration presenting `certs` (leaf first) signed for `key`.
pub fn server_config(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<ServerConfig, CsiError> {
    let mut config = ServerConfig::builder_with_provider(provider())
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(tls_error("TLS versions"))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(tls_error("server certificate"))?;
    config.alpn_protocols = vec![ALPN.to_vec()];
    Ok(config)
}

/// [`server_config`] reading a PEM certificate chain and private key.
pub fn server_config_from_pem(cert: &Path, key: &Path) -> Result<ServerConfig, CsiError> {
    let context = format!("read {}", cert.display());
    let certs = CertificateDer::pem_file_iter(cert)
        .map_err(tls_error(&context))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(tls_error(&context))?;
    if certs.is_empty() {
        return Err(CsiError::TransportError(format!(
            "no certificate in {}",
            cert.display()
        )));
    }
    let context = format!("read {}", key.display());
    let key = PrivateKeyDer::from_pem_file(key).map_err(tls_error(&context))?;
    server_config(certs, key)
}

/// Client configuration trusting only `roots`.
pub fn client_config(
    roots: impl IntoIterator<Item = CertificateDer<'static>>,
) -> Result<ClientConfig, CsiError> {
    let mut store = RootCertStore::empty();
    for cert in roots {
        store.add(cert).map_err(tls_error("root certificate"))?;
    }
    let mut config = ClientConfig::builder_with_provider(provider())
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(tls_error("TLS versions"))?
        .with_root_certificates(store)
        .with_no_client_auth();
    config.alpn_protocols = vec![ALPN.to_vec()];
    Ok(config)
}
