//! Route pool: the collection of endpoints behind a virtual host.

use std::sync::Arc;

use reqwest::Url;

use crate::models::endpoint::Endpoint;
use crate::services::iterator::{EndpointIterator, IteratorFactory};

/// All endpoints registered behind a single virtual host, plus the context
/// path used when setting the sticky-session cookie's `Path` attribute.
pub struct RoutePool {
    pub context_path: String,
    pub route_service_url: Option<Url>,
    pub route_to_internal_route_service: bool,
    endpoints: Vec<Arc<Endpoint>>,
}

impl RoutePool {
    pub fn new(context_path: impl Into<String>, endpoints: Vec<Arc<Endpoint>>) -> Self {
        Self {
            context_path: context_path.into(),
            route_service_url: None,
            route_to_internal_route_service: false,
            endpoints,
        }
    }

    pub fn with_route_service(mut self, url: Url, internal: bool) -> Self {
        self.route_service_url = Some(url);
        self.route_to_internal_route_service = internal;
        self
    }

    pub fn context_path(&self) -> &str {
        &self.context_path
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Returns a request-scoped iterator over this pool's endpoints,
    /// applying `strategy` and preferring `sticky_instance_id` when it
    /// names a live endpoint.
    pub fn endpoints(
        &self,
        strategy: &str,
        sticky_instance_id: Option<&str>,
    ) -> Box<dyn EndpointIterator> {
        IteratorFactory::create(strategy, self.endpoints.clone(), sticky_instance_id)
    }

    pub fn find_by_instance_id(&self, instance_id: &str) -> Option<Arc<Endpoint>> {
        self.endpoints
            .iter()
            .find(|e| e.private_instance_id == instance_id)
            .cloned()
    }
}
