//! TLS configuration for the transport tiers
//!
//! The primary tiers use reqwest's rustls defaults plus any extra roots from
//! [`TlsSettings`]. The fallback tiers connect to literal IPs, so the usual
//! hostname check would compare the certificate against an IP and fail.
//! They get a [`FrontingCertVerifier`] instead: when the peer is addressed
//! by IP and the outgoing request names a different host, the chain is
//! validated against that host. Anything else gets plain WebPKI checks.
//!
//! The expected host reaches the verifier through a task-local set by
//! [`with_expected_host`] around a single fallback exchange. The fallback
//! clients keep no idle connections and never resume TLS sessions, so every
//! fronted request runs a full handshake inside that scope.

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::{Resumption, WebPkiServerVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

tokio::task_local! {
    static EXPECTED_HOST: String;
}

/// Run `future` with `host` as the expected certificate name
pub async fn with_expected_host<F: Future>(host: Option<String>, future: F) -> F::Output {
    match host {
        Some(host) => EXPECTED_HOST.scope(host, future).await,
        None => future.await,
    }
}

/// The expected certificate name for the current task, if one is set
pub fn expected_host() -> Option<String> {
    EXPECTED_HOST.try_with(Clone::clone).ok()
}

/// TLS settings shared by all tiers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    /// Extra trusted roots, PEM files
    pub extra_root_pem: Vec<PathBuf>,
}

impl TlsSettings {
    /// Add a root certificate file
    pub fn with_root_pem(mut self, path: impl Into<PathBuf>) -> Self {
        self.extra_root_pem.push(path.into());
        self
    }

    /// Validate the TLS settings
    pub fn validate(&self) -> Result<(), TlsConfigError> {
        for path in &self.extra_root_pem {
            if !path.exists() {
                return Err(TlsConfigError::CaCertFileNotFound(path.clone()));
            }
        }
        Ok(())
    }

    /// DER certificates from every configured PEM file
    pub fn load_extra_roots(&self) -> Result<Vec<CertificateDer<'static>>, TlsConfigError> {
        let mut certs = Vec::new();
        for path in &self.extra_root_pem {
            certs.extend(load_pem_file(path)?);
        }
        Ok(certs)
    }
}

/// TLS configuration errors
#[derive(Debug, thiserror::Error)]
pub enum TlsConfigError {
    #[error("CA certificate file not found: {0:?}")]
    CaCertFileNotFound(PathBuf),

    #[error("Invalid PEM in {path:?}: {message}")]
    InvalidPem { path: PathBuf, message: String },

    #[error("Failed to build certificate verifier: {0}")]
    Verifier(String),

    #[error("Failed to build TLS client config: {0}")]
    ClientConfig(String),
}

fn load_pem_file(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsConfigError> {
    let bytes = std::fs::read(path).map_err(|_| TlsConfigError::CaCertFileNotFound(path.to_path_buf()))?;
    let certs = CertificateDer::pem_slice_iter(&bytes)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsConfigError::InvalidPem {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    if certs.is_empty() {
        return Err(TlsConfigError::InvalidPem {
            path: path.to_path_buf(),
            message: "no certificates found".to_string(),
        });
    }
    Ok(certs)
}

/// WebPKI roots plus the configured extras
pub fn root_store(settings: &TlsSettings) -> Result<RootCertStore, TlsConfigError> {
    let mut roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    for cert in settings.load_extra_roots()? {
        roots.add(cert).map_err(|e| TlsConfigError::InvalidPem {
            path: PathBuf::new(),
            message: e.to_string(),
        })?;
    }
    Ok(roots)
}

/// Client config for the fallback tiers
pub fn fronting_client_config(settings: &TlsSettings) -> Result<ClientConfig, TlsConfigError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let verifier = FrontingCertVerifier::new(Arc::new(root_store(settings)?), provider.clone())?;

    let mut config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| TlsConfigError::ClientConfig(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    // Sessions are cached per server name, which is the shared IP here.
    // A resumed session would skip the check against the expected host.
    config.resumption = Resumption::disabled();
    Ok(config)
}

/// Pick the name a certificate is checked against.
///
/// `Ok(None)` means the connection's own server name applies. A fronted
/// connection with an expected host that is not a valid DNS name is
/// rejected.
pub fn verification_name(
    server_name: &ServerName<'_>,
    expected: Option<&str>,
) -> Result<Option<ServerName<'static>>, rustls::Error> {
    let (ServerName::IpAddress(peer), Some(expected)) = (server_name, expected) else {
        return Ok(None);
    };
    if let Ok(ip) = expected.parse::<IpAddr>() {
        if IpAddr::from(peer.clone()) == ip {
            return Ok(None);
        }
    }
    ServerName::try_from(expected.to_string())
        .map(Some)
        .map_err(|_| rustls::Error::General(format!("invalid expected host '{expected}'")))
}

/// Certificate verifier for fronted connections
#[derive(Debug)]
pub struct FrontingCertVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl FrontingCertVerifier {
    pub fn new(
        roots: Arc<RootCertStore>,
        provider: Arc<CryptoProvider>,
    ) -> Result<Self, TlsConfigError> {
        let inner = WebPkiServerVerifier::builder_with_provider(roots, provider)
            .build()
            .map_err(|e| TlsConfigError::Verifier(e.to_string()))?;
        Ok(Self { inner })
    }
}

impl ServerCertVerifier for FrontingCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let expected = expected_host();
        match verification_name(server_name, expected.as_deref())? {
            Some(name) => {
                debug!(peer = ?server_name, host = ?name, "verifying fronted certificate");
                self.inner
                    .verify_server_cert(end_entity, intermediates, &name, ocsp_response, now)
                    .inspect_err(|e| warn!(host = ?name, error = %e, "fronted certificate rejected"))
            }
            None => self.inner.verify_server_cert(
                end_entity,
                intermediates,
                server_name,
                ocsp_response,
                now,
            ),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
