//! TLS decoration of accepted connections.
//!
//! The decorator wraps the accept contract, not the socket: the
//! [`crate::Listener`] keeps owning the raw descriptor (and is what a
//! handoff exports), while [`TlsDecorator::accept`] performs the rustls
//! handshake per accepted stream.

use std::fs::File;
use std::io::{self, BufReader};
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::ServerConfig as RustlsConfig;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::server::TlsStream;

use crate::error::{Error, Result};

/// Per-connection TLS handshaker built from PEM material.
///
/// Cloning is cheap (Arc-based), so the supervisor hands a clone to each
/// connection task.
#[derive(Clone)]
pub struct TlsDecorator {
    /// Shared rustls acceptor.
    acceptor: TlsAcceptor,
}

impl std::fmt::Debug for TlsDecorator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsDecorator").finish_non_exhaustive()
    }
}

impl TlsDecorator {
    /// Loads a certificate chain and private key from PEM files.
    ///
    /// Fails construction with [`Error::TlsLoad`] on unreadable files,
    /// empty chains, or unusable key material.
    pub fn from_pem(cert_path: &str, key_path: &str) -> Result<Self> {
        let certs = load_certs(cert_path)?;
        let key = load_key(key_path)?;

        let config = RustlsConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| Error::TlsLoad {
                path: cert_path.to_owned(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            acceptor: TlsAcceptor::from(Arc::new(config)),
        })
    }

    /// Performs the server-side handshake on an accepted stream.
    pub async fn accept(&self, stream: TcpStream) -> io::Result<TlsStream<TcpStream>> {
        self.acceptor.accept(stream).await
    }
}

/// Reads all certificates from a PEM file.
fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| Error::TlsLoad {
        path: path.to_owned(),
        reason: e.to_string(),
    })?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<io::Result<_>>()
        .map_err(|e| Error::TlsLoad {
            path: path.to_owned(),
            reason: e.to_string(),
        })?;
    if certs.is_empty() {
        return Err(Error::TlsLoad {
            path: path.to_owned(),
            reason: "no certificates found".into(),
        });
    }
    Ok(certs)
}

/// Reads the first private key from a PEM file.
fn load_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path).map_err(|e| Error::TlsLoad {
        path: path.to_owned(),
        reason: e.to_string(),
    })?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| Error::TlsLoad {
            path: path.to_owned(),
            reason: e.to_string(),
        })?
        .ok_or_else(|| Error::TlsLoad {
            path: path.to_owned(),
            reason: "no private key found".into(),
        })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn missing_cert_file_fails() {
        let err = TlsDecorator::from_pem("/nonexistent/cert.pem", "/nonexistent/key.pem")
            .unwrap_err();
        assert!(matches!(err, Error::TlsLoad { .. }));
    }

    #[test]
    fn empty_cert_file_fails() {
        let mut cert = tempfile::NamedTempFile::new().unwrap();
        writeln!(cert, "not pem at all").unwrap();
        let key = tempfile::NamedTempFile::new().unwrap();
        let err = TlsDecorator::from_pem(
            cert.path().to_str().unwrap(),
            key.path().to_str().unwrap(),
        )
        .unwrap_err();
        match err {
            Error::TlsLoad { reason, .. } => {
                assert!(reason.contains("no certificates"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
