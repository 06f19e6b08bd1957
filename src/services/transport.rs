//! Transport factory and cache.
//!
//! Builds the `reqwest::Client` bound to a single endpoint the first time it
//! is needed and never again: `Endpoint::round_tripper_or_try_init`
//! guarantees the build closure below runs at most once per endpoint
//! instance, no matter how many requests race to initialize it
//! concurrently — a racing caller awaits the same in-flight build rather
//! than starting a second one. A route
//! service's client carries the proxy's own mTLS client identity against
//! the operator-configured CA pool; a plain backend client additionally
//! installs the endpoint's [`IdentityVerifier`](crate::services::tls_verify)
//! so every leaf certificate is checked against the registered instance id.

use std::io::BufReader;
use std::sync::Arc;

use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::RootCertStore;

use crate::models::endpoint::{Endpoint, RoundTripper, Scheme};
use crate::models::error::TransportError;
use crate::services::classify::ErrorClassifier;
use crate::services::tls_verify::IdentityVerifier;

/// Backend mTLS material: the proxy's own client certificate (presented to
/// backends that demand one) and the CA pool backend certificates are
/// validated against. Both are PEM-encoded, matching how operators hand
/// these to every other TLS-terminating piece of the platform.
#[derive(Clone, Default)]
pub struct BackendTlsConfig {
    pub client_cert_chain_pem: Option<String>,
    pub client_key_pem: Option<String>,
    pub ca_certs_pem: Vec<String>,
}

impl BackendTlsConfig {
    fn root_store(&self) -> Result<RootCertStore, TransportError> {
        let mut store = RootCertStore::empty();
        for pem in &self.ca_certs_pem {
            let mut reader = BufReader::new(pem.as_bytes());
            for cert in rustls_pemfile::certs(&mut reader) {
                let cert = cert.map_err(|e| {
                    TransportError::Unknown(format!("malformed CA certificate: {e}"))
                })?;
                store.add(cert).map_err(|e| {
                    TransportError::Unknown(format!("CA certificate rejected: {e}"))
                })?;
            }
        }
        if store.is_empty() {
            for cert in rustls_native_certs::load_native_certs().certs {
                let _ = store.add(cert);
            }
        }
        Ok(store)
    }

    fn client_identity(&self) -> Result<Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)>, TransportError> {
        let (Some(cert_pem), Some(key_pem)) = (&self.client_cert_chain_pem, &self.client_key_pem)
        else {
            return Ok(None);
        };
        let mut cert_reader = BufReader::new(cert_pem.as_bytes());
        let chain: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_reader)
            .collect::<Result<_, _>>()
            .map_err(|e| TransportError::Unknown(format!("malformed client certificate: {e}")))?;

        let mut key_reader = BufReader::new(key_pem.as_bytes());
        let key = rustls_pemfile::private_key(&mut key_reader)
            .map_err(|e| TransportError::Unknown(format!("malformed client key: {e}")))?
            .ok_or_else(|| TransportError::Unknown("no private key found in client key PEM".into()))?;

        Ok(Some((chain, key)))
    }
}

/// `reqwest`-backed transport: a client built once per endpoint, with a TLS
/// configuration tailored to that endpoint when the endpoint is reachable
/// over TLS.
pub struct HttpRoundTripper {
    client: reqwest::Client,
}

#[async_trait::async_trait]
impl RoundTripper for HttpRoundTripper {
    async fn round_trip(&self, req: reqwest::Request) -> Result<reqwest::Response, TransportError> {
        self.client
            .execute(req)
            .await
            .map_err(ErrorClassifier::from_reqwest)
    }
}

/// Builds and caches the transport for a single endpoint.
///
/// `is_route_service` selects whether the client's TLS configuration trusts
/// the endpoint's registered instance id (backend mode) or the operator's
/// general CA pool with default hostname verification (route-service mode,
/// since route services are addressed by DNS name, not instance id).
pub struct TransportFactory {
    tls: BackendTlsConfig,
}

impl TransportFactory {
    pub fn new(tls: BackendTlsConfig) -> Self {
        Self { tls }
    }

    /// Returns the endpoint's transport, building it on the first call. The
    /// peek avoids even entering the `OnceCell` machinery once an endpoint
    /// is warm; `Endpoint::round_tripper_or_try_init` owns the actual
    /// one-shot guarantee, so a race between two first callers results in
    /// exactly one `reqwest::Client`/TLS config build, with the loser
    /// awaiting the winner's result rather than building its own.
    pub async fn get_round_tripper(
        &self,
        endpoint: &Endpoint,
        is_route_service: bool,
    ) -> Result<Arc<dyn RoundTripper>, TransportError> {
        if let Some(existing) = endpoint.round_tripper_peek() {
            return Ok(existing);
        }
        endpoint
            .round_tripper_or_try_init(|| async move {
                let client = self.build_client(endpoint, is_route_service)?;
                Ok::<Arc<dyn RoundTripper>, TransportError>(Arc::new(HttpRoundTripper { client }))
            })
            .await
    }

    fn build_client(
        &self,
        endpoint: &Endpoint,
        is_route_service: bool,
    ) -> Result<reqwest::Client, TransportError> {
        let builder = reqwest::Client::builder().pool_max_idle_per_host(32);

        if matches!(endpoint.scheme, Scheme::Http) {
            return builder
                .build()
                .map_err(|e| TransportError::Unknown(format!("client build failed: {e}")));
        }

        let roots = self.tls.root_store()?;
        let identity = self.tls.client_identity()?;

        let wants_client_cert = if is_route_service {
            rustls::ClientConfig::builder().with_root_certificates(roots)
        } else {
            let base_verifier = WebPkiServerVerifier::builder(Arc::new(roots))
                .build()
                .map_err(|e| TransportError::Unknown(format!("verifier build failed: {e}")))?;
            let verifier = IdentityVerifier::new(base_verifier, endpoint.server_cert_domain_san.clone());
            rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(verifier)
        };

        let tls_config = match identity {
            Some((chain, key)) => wants_client_cert
                .with_client_auth_cert(chain, key)
                .map_err(|e| TransportError::Unknown(format!("client identity rejected: {e}")))?,
            None => wants_client_cert.with_no_client_auth(),
        };

        builder
            .use_preconfigured_tls(tls_config)
            .build()
            .map_err(|e| TransportError::Unknown(format!("client build failed: {e}")))
    }
}
