//! TLS configuration and certificate loading.
//!
//! Certificates are issued elsewhere; this module only turns PEM files into
//! rustls client and server contexts.

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::crypto::CryptoProvider;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::{TlsAcceptor, TlsConnector};

fn ring_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn invalid_data(msg: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg)
}

fn open_pem(path: &Path) -> Result<BufReader<File>, std::io::Error> {
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("PEM file not found: {:?}", path),
        ));
    }
    Ok(BufReader::new(File::open(path)?))
}

/// Load every certificate from a PEM file.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, std::io::Error> {
    let mut reader = open_pem(path)?;
    let certs = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(invalid_data(format!("no certificates in {:?}", path)));
    }
    Ok(certs)
}

/// Load the first private key from a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, std::io::Error> {
    let mut reader = open_pem(path)?;
    rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| invalid_data(format!("no private key in {:?}", path)))
}

/// Build a client connector trusting the webpki roots, plus an optional
/// extra CA bundle.
pub fn client_connector(ca_path: Option<&Path>) -> Result<TlsConnector, std::io::Error> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(path) = ca_path {
        for cert in load_certs(path)? {
            roots
                .add(cert)
                .map_err(|e| invalid_data(format!("bad CA certificate in {:?}: {}", path, e)))?;
        }
    }

    // Pinned to ring: other dependencies may enable a second provider, which
    // makes the process-level default ambiguous.
    let config = ClientConfig::builder_with_provider(ring_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| invalid_data(format!("TLS protocol setup failed: {}", e)))?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Build a server acceptor from certificate and key files.
pub fn server_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, std::io::Error> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let config = ServerConfig::builder_with_provider(ring_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| invalid_data(format!("TLS protocol setup failed: {}", e)))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| invalid_data(format!("invalid certificate/key pair: {}", e)))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Convert a host into a TLS server name (DNS name or IP literal).
pub fn server_name(host: &str) -> Result<ServerName<'static>, std::io::Error> {
    ServerName::try_from(host.to_string())
        .map_err(|_| invalid_data(format!("invalid TLS server name '{}'", host)))
}
