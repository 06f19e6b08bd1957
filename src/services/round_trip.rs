//! Round-trip engine: the dispatch core.
//!
//! For a backend request: resolve the route pool from request-scoped
//! context, pick an endpoint iterator per the configured load-balancing
//! strategy (seeded with any sticky-session hint), then attempt the request
//! against endpoints in turn, retrying up to [`MAX_RETRIES`] times on
//! retriable transport failures. For a request destined to an external
//! route service, skip pool iteration entirely and make one direct,
//! unretried call — a route service is a single hop, not a pool of
//! interchangeable instances, and the engine never buffers a body to make
//! a second attempt safe.
//!
//! Each attempt is raced against a per-attempt deadline using
//! `tokio::select!`; whichever branch does not finish first is dropped.
//! There is no explicit cancellation signal sent down to the transport —
//! dropping the losing future simply stops polling it, which is sound
//! because the engine never replays a request body past the first byte
//! sent on the wire.

use std::sync::Arc;
use std::time::Duration;

use actix_web::http::header::{HeaderName, HeaderValue, HOST};
use actix_web::web::Bytes;
use actix_web::{HttpMessage, HttpRequest, HttpResponse};
use log::{debug, error, warn};
use reqwest::Method;

use crate::config::settings::Settings;
use crate::models::endpoint::{Endpoint, Scheme};
use crate::models::error::{DispatchError, TransportError};
use crate::models::request_info::RequestInfo;
use crate::services::classify::ErrorClassifier;
use crate::services::render::ErrorRenderer;
use crate::services::sticky::{get_sticky_session, setup_sticky_session};
use crate::services::transport::{BackendTlsConfig, TransportFactory};

/// Upper bound on attempts against alternate endpoints for a single
/// request. A request that exhausts its pool without a single retriable
/// success finalizes on the last transport error observed.
pub const MAX_RETRIES: usize = 3;

/// Header a route service receives the original request's externally
/// visible URL under, so it can recompose a response or forward the
/// request back to the platform once it has done its work.
const FORWARDED_URL_HEADER: &str = "X-Cf-Forwarded-Url";

const APPLICATION_ID_HEADER: &str = "X-CF-ApplicationID";
const INSTANCE_INDEX_HEADER: &str = "X-CF-InstanceIndex";
const INSTANCE_ID_HEADER: &str = "X-CF-InstanceID";

pub struct Engine {
    settings: Settings,
    transport: TransportFactory,
    /// Shared synthetic endpoint backing every *internal* route-service
    /// dispatch: its transport is built once, on first use, and reused
    /// across requests and across the different route-service URLs a
    /// route may name, since internal route services share one mTLS
    /// posture on the platform's own network. External route services
    /// get a fresh synthetic endpoint per request instead (see
    /// `dispatch_route_service`), since each may have its own CA trust
    /// expectations worth isolating.
    internal_route_service_endpoint: Arc<Endpoint>,
}

impl Engine {
    pub fn new(settings: Settings) -> Result<Self, DispatchError> {
        let tls = BackendTlsConfig {
            client_cert_chain_pem: settings.backends.client_auth_certificate.clone(),
            client_key_pem: settings.backends.client_auth_key.clone(),
            ca_certs_pem: settings.backends.ca_certs.clone(),
        };
        let internal_route_service_endpoint = Arc::new(Endpoint::new(
            "",
            Scheme::Tls,
            "",
            "internal-route-service",
            "",
        ));
        Ok(Self {
            transport: TransportFactory::new(tls),
            settings,
            internal_route_service_endpoint,
        })
    }

    pub async fn round_trip(&self, req: &HttpRequest, body: Bytes) -> HttpResponse {
        let info = match req.extensions().get::<Arc<RequestInfo>>().cloned() {
            Some(info) => info,
            None => {
                error!("missing request info in extensions, refusing to dispatch");
                return ErrorRenderer::render(&DispatchError::MissingContext);
            }
        };

        let dispatch_to_route_service = info.route_service_url.is_some();

        let result = if dispatch_to_route_service {
            self.dispatch_route_service(req, &body, &info).await
        } else {
            self.dispatch_backend(req, &body, &info).await
        };

        info.mark_stopped();

        match result {
            Ok(mut response) => {
                if !dispatch_to_route_service {
                    let original = get_sticky_session(req, &self.settings.sticky_session_cookie_names);
                    if let Some(endpoint) = info.route_endpoint() {
                        if !endpoint.private_instance_id.is_empty() {
                            setup_sticky_session(
                                &mut response,
                                &endpoint.private_instance_id,
                                &original,
                                self.settings.secure_cookies,
                                info.route_pool.context_path(),
                                &self.settings.sticky_session_cookie_names,
                            );
                        }
                    }
                }
                response
            }
            Err(err) => ErrorRenderer::render(&err),
        }
    }

    async fn dispatch_backend(
        &self,
        req: &HttpRequest,
        body: &Bytes,
        info: &RequestInfo,
    ) -> Result<HttpResponse, DispatchError> {
        if info.route_pool.is_empty() {
            return Err(DispatchError::NoEndpointsAvailable);
        }

        let sticky_instance_id = get_sticky_session(req, &self.settings.sticky_session_cookie_names);
        let sticky_ref = (!sticky_instance_id.is_empty()).then_some(sticky_instance_id.as_str());
        let mut iterator = info.route_pool.endpoints(&self.settings.load_balance, sticky_ref);

        let context_path = info.route_pool.context_path();
        let mut last_err: Option<TransportError> = None;
        let mut attempts = 0usize;
        for _ in 0..MAX_RETRIES {
            let Some(endpoint) = iterator.next() else {
                break;
            };
            attempts += 1;
            debug!(
                "attempt {attempts} for pool '{context_path}': dispatching to endpoint {} ({})",
                endpoint.private_instance_id, endpoint.address
            );
            iterator.pre_request(&endpoint);
            let outcome = self.attempt(req, body, &endpoint.address, endpoint.is_tls(), &endpoint, false).await;
            iterator.post_request(&endpoint);

            match outcome {
                Ok(response) => {
                    info.set_route_endpoint(endpoint);
                    return Ok(response);
                }
                Err(err) => {
                    let retriable = ErrorClassifier::is_retriable(&err);
                    warn!(
                        "attempt {attempts} for pool '{context_path}' against endpoint {} failed: {err} (retriable={retriable})",
                        endpoint.private_instance_id
                    );
                    iterator.endpoint_failed(&err);
                    last_err = Some(err);
                    if !retriable {
                        break;
                    }
                }
            }
        }

        if let Some(err) = &last_err {
            error!(
                "pool '{context_path}' exhausted after {attempts} attempt(s), final error: {err}"
            );
        }

        Err(last_err
            .map(DispatchError::from)
            .unwrap_or(DispatchError::NoEndpointsAvailable))
    }

    async fn dispatch_route_service(
        &self,
        req: &HttpRequest,
        body: &Bytes,
        info: &RequestInfo,
    ) -> Result<HttpResponse, DispatchError> {
        let url = info
            .route_service_url
            .clone()
            .expect("checked by round_trip before dispatch_route_service is called");

        let endpoint = if info.should_route_to_internal_route_service {
            self.internal_route_service_endpoint.clone()
        } else {
            let scheme = if url.scheme() == "https" { Scheme::Tls } else { Scheme::Http };
            let host = url.host_str().unwrap_or_default();
            let address = match url.port() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_string(),
            };
            Arc::new(Endpoint::new(address, scheme, "", host, ""))
        };

        let forwarded_url = req.uri().to_string();
        let mut last_err = None;
        for _ in 0..MAX_RETRIES {
            match self
                .attempt_with_url(req, body, url.clone(), &endpoint, true, Some(forwarded_url.clone()))
                .await
            {
                Ok(response) => {
                    info.set_route_endpoint(endpoint);
                    return Ok(response);
                }
                Err(err) => {
                    let retriable = ErrorClassifier::is_retriable(&err);
                    warn!("route service request to '{url}' failed: {err} (retriable={retriable})");
                    last_err = Some(err);
                    if !retriable {
                        break;
                    }
                }
            }
        }

        Err(last_err.map(DispatchError::from).unwrap_or(DispatchError::NoEndpointsAvailable))
    }

    async fn attempt(
        &self,
        req: &HttpRequest,
        body: &Bytes,
        address: &str,
        is_tls: bool,
        endpoint: &Arc<Endpoint>,
        is_route_service: bool,
    ) -> Result<HttpResponse, TransportError> {
        let scheme = if is_tls { "https" } else { "http" };
        let url_str = format!("{scheme}://{address}{}", req.uri());
        let url = reqwest::Url::parse(&url_str)
            .map_err(|e| TransportError::Unknown(format!("invalid outbound url: {e}")))?;
        self.attempt_with_url(req, body, url, endpoint, is_route_service, None)
            .await
    }

    async fn attempt_with_url(
        &self,
        req: &HttpRequest,
        body: &Bytes,
        url: reqwest::Url,
        endpoint: &Arc<Endpoint>,
        is_route_service: bool,
        forwarded_url: Option<String>,
    ) -> Result<HttpResponse, TransportError> {
        let round_tripper = self.transport.get_round_tripper(endpoint, is_route_service).await?;
        let identity = (!is_route_service).then_some(endpoint.as_ref());
        let outbound = Self::build_outbound_request(req, body, url, forwarded_url, identity)?;

        let timeout_ms = if is_route_service {
            self.settings.route_services.timeout_ms
        } else {
            self.settings.endpoint_timeout_ms
        };
        let response = if timeout_ms == 0 {
            round_tripper.round_trip(outbound).await?
        } else {
            let timeout = Duration::from_millis(timeout_ms);
            tokio::select! {
                res = round_tripper.round_trip(outbound) => res?,
                _ = tokio::time::sleep(timeout) => {
                    warn!(
                        "backend-request-timeout: endpoint {} exceeded {}ms",
                        endpoint.private_instance_id, timeout.as_millis()
                    );
                    round_tripper.cancel_request();
                    return Err(TransportError::DeadlineExceededPostSend);
                }
            }
        };

        Self::translate_response(response).await
    }

    fn build_outbound_request(
        req: &HttpRequest,
        body: &Bytes,
        url: reqwest::Url,
        forwarded_url: Option<String>,
        identity: Option<&Endpoint>,
    ) -> Result<reqwest::Request, TransportError> {
        let method = Method::from_bytes(req.method().as_str().as_bytes())
            .map_err(|e| TransportError::Unknown(format!("invalid method: {e}")))?;

        let mut outbound = reqwest::Request::new(method, url);
        for (name, value) in req.headers() {
            if name == HOST {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes()),
                reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
            ) {
                outbound.headers_mut().insert(name, value);
            }
        }
        if let Some(forwarded) = forwarded_url {
            if let (Ok(name), Ok(value)) = (
                reqwest::header::HeaderName::from_bytes(FORWARDED_URL_HEADER.as_bytes()),
                reqwest::header::HeaderValue::from_str(&forwarded),
            ) {
                outbound.headers_mut().insert(name, value);
            }
        }
        // Backend instance identity is always overwritten here, never trusted
        // from the inbound request's own copy of these headers.
        if let Some(endpoint) = identity {
            Self::insert_ascii_header(
                &mut outbound,
                APPLICATION_ID_HEADER,
                &endpoint.application_id,
            );
            Self::insert_ascii_header(
                &mut outbound,
                INSTANCE_INDEX_HEADER,
                &endpoint.private_instance_index,
            );
            Self::insert_ascii_header(
                &mut outbound,
                INSTANCE_ID_HEADER,
                &endpoint.private_instance_id,
            );
        }
        *outbound.body_mut() = Some(body.to_vec().into());
        Ok(outbound)
    }

    fn insert_ascii_header(outbound: &mut reqwest::Request, name: &str, value: &str) {
        if let (Ok(name), Ok(value)) = (
            reqwest::header::HeaderName::from_bytes(name.as_bytes()),
            reqwest::header::HeaderValue::from_str(value),
        ) {
            outbound.headers_mut().insert(name, value);
        }
    }

    async fn translate_response(response: reqwest::Response) -> Result<HttpResponse, TransportError> {
        let status = actix_web::http::StatusCode::from_u16(response.status().as_u16())
            .unwrap_or(actix_web::http::StatusCode::BAD_GATEWAY);
        let mut builder = HttpResponse::build(status);
        for (name, value) in response.headers() {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_str().as_bytes()),
                HeaderValue::from_bytes(value.as_bytes()),
            ) {
                builder.insert_header((name, value));
            }
        }
        let bytes = response.bytes().await.map_err(ErrorClassifier::from_reqwest)?;
        Ok(builder.body(bytes))
    }
}
