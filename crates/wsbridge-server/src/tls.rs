//! TLS termination for the listener.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use tokio_rustls::TlsAcceptor;
use wsbridge_client::TransportError;

/// Build an acceptor from a PEM certificate chain and private key.
pub fn load_tls_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, TransportError> {
    let mut cert_reader = BufReader::new(open(cert_path, "cert")?);
    let mut key_reader = BufReader::new(open(key_path, "key")?);

    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| pem_error(cert_path, &e))?;
    if certs.is_empty() {
        return Err(TransportError::new(
            format!("no certificate found in {}", cert_path.display()),
            0,
        ));
    }
    let key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| pem_error(key_path, &e))?
        .ok_or_else(|| {
            TransportError::new(format!("no private key found in {}", key_path.display()), 0)
        })?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .and_then(|builder| builder.with_no_client_auth().with_single_cert(certs, key))
        .map_err(|e| TransportError::new(format!("invalid cert or key: {e}"), 0))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn open(path: &Path, what: &str) -> Result<File, TransportError> {
    File::open(path).map_err(|e| {
        TransportError::new(
            format!("open {what} {}: {e}", path.display()),
            e.raw_os_error().unwrap_or(0),
        )
    })
}

fn pem_error(path: &Path, err: &std::io::Error) -> TransportError {
    TransportError::new(format!("read {}: {err}", path.display()), 0)
}
