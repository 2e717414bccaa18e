//! TLS configuration for both endpoints
//!
//! The server side loads a PEM certificate chain and private key from disk.
//! The client side starts from the platform trust store and may be extended
//! with custom trust anchors, which is how self-signed deployments are
//! recognized. Both sides require TLS 1.2 or newer.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::RootCertStore;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::warn;

use crate::error::{ChatError, Result};

/// Protocol versions offered on both endpoints, TLS 1.2 minimum.
static TLS_VERSIONS: &[&rustls::SupportedProtocolVersion] =
    &[&rustls::version::TLS13, &rustls::version::TLS12];

/// Load all certificates from a PEM file.
pub fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| {
        ChatError::config(format!("cannot open certificate {}: {}", path.display(), e))
    })?;
    let mut reader = BufReader::new(file);
    let certs: std::io::Result<Vec<_>> = rustls_pemfile::certs(&mut reader).collect();
    let certs = certs.map_err(|e| {
        ChatError::config(format!("cannot parse certificate {}: {}", path.display(), e))
    })?;
    if certs.is_empty() {
        return Err(ChatError::config(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

/// Load the first private key from a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path).map_err(|e| {
        ChatError::config(format!("cannot open private key {}: {}", path.display(), e))
    })?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| {
            ChatError::config(format!("cannot parse private key {}: {}", path.display(), e))
        })?
        .ok_or_else(|| ChatError::config(format!("no private key found in {}", path.display())))
}

/// Build the server-side TLS acceptor from a certificate/key pair on disk.
pub fn server_acceptor(certificate_path: &Path, private_key_path: &Path) -> Result<TlsAcceptor> {
    let certs = load_certificates(certificate_path)?;
    let key = load_private_key(private_key_path)?;

    let config = rustls::ServerConfig::builder_with_protocol_versions(TLS_VERSIONS)
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ChatError::config(format!("invalid certificate/key pair: {}", e)))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Build the client-side TLS connector.
///
/// The root store is seeded from the platform trust store; each path in
/// `custom_certificates` contributes additional trust anchors.
pub fn client_connector<P: AsRef<Path>>(custom_certificates: &[P]) -> Result<TlsConnector> {
    let mut roots = RootCertStore::empty();

    let native = rustls_native_certs::load_native_certs();
    for error in &native.errors {
        warn!("could not load a platform trust anchor: {}", error);
    }
    let (_added, ignored) = roots.add_parsable_certificates(native.certs);
    if ignored > 0 {
        warn!("ignored {} unparsable platform trust anchors", ignored);
    }

    for path in custom_certificates {
        for cert in load_certificates(path.as_ref())? {
            roots.add(cert).map_err(|e| {
                ChatError::config(format!(
                    "cannot trust certificate {}: {}",
                    path.as_ref().display(),
                    e
                ))
            })?;
        }
    }

    let config = rustls::ClientConfig::builder_with_protocol_versions(TLS_VERSIONS)
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}
