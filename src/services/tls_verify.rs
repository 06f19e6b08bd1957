//! Custom TLS server-certificate verification for backend connections.
//!
//! Runs after rustls's own chain validation against the configured trust
//! store (`WebPkiServerVerifier`); this layer additionally demands that the
//! backend's leaf certificate carry the *registered instance id*, not a DNS
//! name the proxy happens to dial. Identity matching rules:
//!
//! - a DNS SAN equal to the expected instance id is accepted;
//! - in the absence of any DNS SAN, a `CommonName` equal to the expected id
//!   is accepted (CN fallback only applies when there are no DNS SANs);
//! - IP SANs are never consulted for identity, and a non-matching DNS SAN
//!   overrides a matching CN.
//!
//! Modeled on the "wrap the base verifier, only add a check" shape used by
//! custom rustls verifiers: the base `WebPkiServerVerifier` still owns
//! signature verification and chain building; we only intercept the
//! identity decision.

use std::fmt;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, DigitallySignedStruct, Error as TlsError, OtherError, SignatureScheme};
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::{FromDer, X509Certificate};

/// The specific reason an endpoint's certificate failed our identity check,
/// carried through `rustls::Error::InvalidCertificate(CertificateError::Other(..))`
/// so the round-trip engine can recover the exact `ErrorKind` after the
/// handshake error has been wrapped by hyper/reqwest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IdentityFailure {
    #[error("no certificate chain validated against the trust store")]
    InvalidCert,
    #[error("endpoint registered with a TLS port but no instance id to verify against")]
    MissingInstanceId,
    #[error("certificate identity does not match the registered instance id")]
    HostnameMismatch,
}

impl IdentityFailure {
    fn into_tls_error(self) -> TlsError {
        TlsError::InvalidCertificate(CertificateError::Other(OtherError(Arc::new(self))))
    }

    /// Walks a boxed error's `source()` chain looking for an
    /// `IdentityFailure` we stashed during the handshake.
    pub fn find(err: &(dyn std::error::Error + 'static)) -> Option<IdentityFailure> {
        let mut cause: Option<&(dyn std::error::Error + 'static)> = Some(err);
        while let Some(e) = cause {
            if let Some(TlsError::InvalidCertificate(CertificateError::Other(OtherError(inner)))) =
                e.downcast_ref::<TlsError>()
            {
                if let Some(found) = inner.downcast_ref::<IdentityFailure>() {
                    return Some(*found);
                }
            }
            cause = e.source();
        }
        None
    }
}

/// Wraps a `WebPkiServerVerifier` built from the configured backend CA pool
/// with the proxy's instance-id identity check, for a single endpoint's
/// expected name.
pub struct IdentityVerifier {
    inner: Arc<WebPkiServerVerifier>,
    expected_instance_id: String,
}

impl fmt::Debug for IdentityVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityVerifier")
            .field("expected_instance_id", &self.expected_instance_id)
            .finish()
    }
}

impl IdentityVerifier {
    pub fn new(inner: Arc<WebPkiServerVerifier>, expected_instance_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            expected_instance_id: expected_instance_id.into(),
        })
    }

    fn check_identity(&self, end_entity: &CertificateDer<'_>) -> Result<(), IdentityFailure> {
        if self.expected_instance_id.is_empty() {
            return Err(IdentityFailure::MissingInstanceId);
        }

        let (_, cert) = X509Certificate::from_der(end_entity.as_ref())
            .map_err(|_| IdentityFailure::InvalidCert)?;

        let dns_sans: Vec<String> = cert
            .subject_alternative_name()
            .ok()
            .flatten()
            .map(|ext| {
                ext.value
                    .general_names
                    .iter()
                    .filter_map(|name| match name {
                        GeneralName::DNSName(dns) => Some(dns.to_string()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        if dns_sans.iter().any(|san| san == &self.expected_instance_id) {
            return Ok(());
        }

        if dns_sans.is_empty() {
            let cn_matches = cert
                .subject()
                .iter_common_name()
                .filter_map(|cn| cn.as_str().ok())
                .any(|cn| cn == self.expected_instance_id);
            if cn_matches {
                return Ok(());
            }
        }

        Err(IdentityFailure::HostnameMismatch)
    }
}

impl ServerCertVerifier for IdentityVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        // Default hostname verification is disabled: delegate chain/signature
        // validation to the base verifier but ignore its opinion on the DNS
        // name, since identity here is the registered instance id, not DNS.
        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Ok(verified) => {
                self.check_identity(end_entity)
                    .map_err(IdentityFailure::into_tls_error)?;
                Ok(verified)
            }
            Err(TlsError::InvalidCertificate(CertificateError::NotValidForName))
            | Err(TlsError::InvalidCertificate(CertificateError::NotValidForNameContext {
                ..
            })) => {
                // Chain validated; only the (irrelevant) DNS name check
                // failed. Apply our own identity rule instead.
                self.check_identity(end_entity)
                    .map_err(IdentityFailure::into_tls_error)?;
                Ok(ServerCertVerified::assertion())
            }
            Err(_) => Err(IdentityFailure::InvalidCert.into_tls_error()),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
