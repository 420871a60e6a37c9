//! TLS Material
//!
//! `TlsConfig` names the PEM files for a TLS-secured TCP endpoint. It is
//! turned into a rustls `ClientConfig` once, when the connector is built;
//! unreadable or inconsistent material fails there rather than on first use.

use std::fmt;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use serde::{Deserialize, Serialize};

use super::TransportError;

/// CA bundle file name inside a certificate directory
pub const CA_FILE: &str = "ca.pem";
/// Client certificate file name inside a certificate directory
pub const CERT_FILE: &str = "cert.pem";
/// Client key file name inside a certificate directory
pub const KEY_FILE: &str = "key.pem";

/// TLS settings for a `tcp://` or `https://` endpoint
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    /// CA bundle used to verify the daemon; public web roots when absent
    pub ca_cert: Option<PathBuf>,
    /// Client certificate chain for mutual TLS
    pub client_cert: Option<PathBuf>,
    /// Private key matching `client_cert`
    pub client_key: Option<PathBuf>,
    /// Accept any server certificate (handshake signatures are still checked)
    #[serde(default)]
    pub skip_verify: bool,
}

impl TlsConfig {
    /// Use `ca.pem`, `cert.pem` and `key.pem` from a directory, where present
    ///
    /// This is the layout of `DOCKER_CERT_PATH` and of a context's TLS
    /// directory.
    #[must_use]
    pub fn from_cert_dir(dir: &Path) -> Self {
        let pick = |name: &str| {
            let path = dir.join(name);
            path.is_file().then_some(path)
        };
        Self {
            ca_cert: pick(CA_FILE),
            client_cert: pick(CERT_FILE),
            client_key: pick(KEY_FILE),
            skip_verify: false,
        }
    }

    /// Build the rustls client configuration
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Tls` if a PEM file cannot be read or parsed,
    /// or if only one of client certificate and key is given.
    pub fn build(&self) -> Result<Arc<rustls::ClientConfig>, TransportError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let builder = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| TransportError::Tls(e.to_string()))?;

        let builder = if self.skip_verify {
            tracing::warn!("TLS server certificate verification disabled");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }))
        } else {
            builder.with_root_certificates(self.root_store()?)
        };

        let config = match (&self.client_cert, &self.client_key) {
            (Some(cert), Some(key)) => {
                let chain = load_certs(cert)?;
                let key = load_key(key)?;
                builder
                    .with_client_auth_cert(chain, key)
                    .map_err(|e| TransportError::Tls(format!("Client certificate rejected: {e}")))?
            }
            (None, None) => builder.with_no_client_auth(),
            _ => {
                return Err(TransportError::Tls(
                    "Client certificate and key must be given together".to_string(),
                ))
            }
        };

        Ok(Arc::new(config))
    }

    fn root_store(&self) -> Result<RootCertStore, TransportError> {
        let mut roots = RootCertStore::empty();
        match &self.ca_cert {
            Some(path) => {
                for cert in load_certs(path)? {
                    roots.add(cert).map_err(|e| {
                        TransportError::Tls(format!("Invalid CA certificate in {path:?}: {e}"))
                    })?;
                }
            }
            None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
        }
        Ok(roots)
    }
}

/// Server name for SNI and certificate checks
///
/// # Errors
///
/// Returns `TransportError::InvalidTarget` for names rustls rejects.
pub fn server_name(host: &str) -> Result<ServerName<'static>, TransportError> {
    ServerName::try_from(host.to_string())
        .map_err(|e| TransportError::InvalidTarget(format!("Invalid TLS server name {host:?}: {e}")))
}

/// Classify a handshake failure
///
/// Certificate rejections become `TlsVerification`; everything else is `Tls`.
pub fn handshake_error(err: std::io::Error) -> TransportError {
    let rustls_err = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>());

    match rustls_err {
        Some(rustls::Error::InvalidCertificate(reason)) => {
            TransportError::TlsVerification(format!("{reason:?}"))
        }
        Some(other) => TransportError::Tls(other.to_string()),
        None => TransportError::Tls(err.to_string()),
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>, TransportError> {
    std::fs::read(path).map_err(|e| TransportError::Tls(format!("Failed to read {path:?}: {e}")))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let pem = read_pem(path)?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(pem.as_slice()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TransportError::Tls(format!("Invalid PEM in {path:?}: {e}")))?;

    if certs.is_empty() {
        return Err(TransportError::Tls(format!("No certificates in {path:?}")));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TransportError> {
    let pem = read_pem(path)?;
    rustls_pemfile::private_key(&mut BufReader::new(pem.as_slice()))
        .map_err(|e| TransportError::Tls(format!("Invalid PEM in {path:?}: {e}")))?
        .ok_or_else(|| TransportError::Tls(format!("No private key in {path:?}")))
}

/// Verifier installed for `skip_verify`
///
/// Accepts any certificate chain but still verifies handshake signatures
/// against the presented certificate.
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl fmt::Debug for AcceptAnyServerCert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AcceptAnyServerCert")
    }
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
