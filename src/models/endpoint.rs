//! Backend instance representation.
//!
//! An [`Endpoint`] is a single registered application instance: an address,
//! a TLS identity the proxy must verify, and a lazily initialized transport
//! slot. The engine never mutates an endpoint except through
//! [`Endpoint::round_tripper`], which guarantees at most one transport is
//! ever constructed for a given endpoint instance.

use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::models::error::TransportError;

/// A value bound to an endpoint: a long-lived HTTP client with a connection
/// pool and (for backend endpoints) a TLS configuration. At most one exists
/// per [`Endpoint`] instance; once bound it is not reconfigured.
#[async_trait]
pub trait RoundTripper: Send + Sync {
    /// Executes one HTTP request against this endpoint's transport.
    async fn round_trip(&self, req: reqwest::Request) -> Result<reqwest::Response, TransportError>;

    /// Best-effort cancellation hook for an in-flight request. The default
    /// transport cancels implicitly when the caller drops the in-flight
    /// future (see the timed-attempt design in the round-trip engine), so
    /// this is a no-op unless a transport needs explicit teardown.
    fn cancel_request(&self) {}
}

/// Transport scheme an endpoint is reachable over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Tls,
}

/// A single backend instance behind a route pool.
///
/// Created by the route registry on registration, dropped when the
/// endpoint is pruned. `server_cert_domain_san` is the identity the proxy
/// demands from the backend's certificate; by convention it equals
/// `private_instance_id`.
pub struct Endpoint {
    pub address: String,
    pub scheme: Scheme,
    pub application_id: String,
    pub private_instance_id: String,
    pub private_instance_index: String,
    pub server_cert_domain_san: String,
    pub tags: std::collections::HashMap<String, String>,
    round_tripper: OnceCell<Arc<dyn RoundTripper>>,
    active_connections: AtomicU64,
}

impl Endpoint {
    pub fn new(
        address: impl Into<String>,
        scheme: Scheme,
        application_id: impl Into<String>,
        private_instance_id: impl Into<String>,
        private_instance_index: impl Into<String>,
    ) -> Self {
        let private_instance_id = private_instance_id.into();
        Self {
            address: address.into(),
            scheme,
            application_id: application_id.into(),
            server_cert_domain_san: private_instance_id.clone(),
            private_instance_id,
            private_instance_index: private_instance_index.into(),
            tags: std::collections::HashMap::new(),
            round_tripper: OnceCell::new(),
            active_connections: AtomicU64::new(0),
        }
    }

    pub fn is_tls(&self) -> bool {
        self.scheme == Scheme::Tls
    }

    /// Canonical `host:port` address used as the request's effective host.
    pub fn canonical_addr(&self) -> &str {
        &self.address
    }

    /// Idempotently initializes the transport slot, invoking `init` at most
    /// once regardless of concurrent callers: a second caller that arrives
    /// while the first is still building blocks on the same in-flight
    /// future rather than racing it, so `init` (which performs the actual
    /// `reqwest::Client`/TLS config construction) runs exactly once per
    /// endpoint even under concurrent first access. A failed build is not
    /// cached, so a later call may retry. Subsequent successful calls
    /// return the cached instance. This is the one-shot initializer the
    /// transport factory and cache (`services::transport`) drives.
    pub async fn round_tripper_or_try_init<F, Fut>(
        &self,
        init: F,
    ) -> Result<Arc<dyn RoundTripper>, TransportError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn RoundTripper>, TransportError>>,
    {
        self.round_tripper
            .get_or_try_init(init)
            .await
            .map(|tripper| tripper.clone())
    }

    /// Returns the already-initialized transport, if any, without
    /// triggering construction. Lets callers skip rebuilding an expensive
    /// client just to discard it in favor of the cached one.
    pub fn round_tripper_peek(&self) -> Option<Arc<dyn RoundTripper>> {
        self.round_tripper.get().cloned()
    }

    pub fn increment_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_connections(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("address", &self.address)
            .field("scheme", &self.scheme)
            .field("application_id", &self.application_id)
            .field("private_instance_id", &self.private_instance_id)
            .field("private_instance_index", &self.private_instance_index)
            .finish()
    }
}
