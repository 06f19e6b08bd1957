//! Per-request scratch attached to the request context by upstream
//! middleware, consumed by the round-trip engine.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use reqwest::Url;

use crate::models::endpoint::Endpoint;
use crate::models::pool::RoutePool;

/// Request-scoped context the engine requires to dispatch a request.
/// Inserted into the actix request extensions before the engine's handler
/// runs; absence of `route_pool` is a programmer error (`missing_context`).
pub struct RequestInfo {
    pub route_pool: Arc<RoutePool>,
    pub route_service_url: Option<Url>,
    pub should_route_to_internal_route_service: bool,
    route_endpoint: Mutex<Option<Arc<Endpoint>>>,
    stopped_at: Mutex<Option<DateTime<Utc>>>,
}

impl RequestInfo {
    pub fn new(route_pool: Arc<RoutePool>) -> Self {
        Self {
            route_pool,
            route_service_url: None,
            should_route_to_internal_route_service: false,
            route_endpoint: Mutex::new(None),
            stopped_at: Mutex::new(None),
        }
    }

    pub fn with_route_service(mut self, url: Url, internal: bool) -> Self {
        self.route_service_url = Some(url);
        self.should_route_to_internal_route_service = internal;
        self
    }

    pub fn set_route_endpoint(&self, endpoint: Arc<Endpoint>) {
        *self.route_endpoint.lock().unwrap() = Some(endpoint);
    }

    pub fn route_endpoint(&self) -> Option<Arc<Endpoint>> {
        self.route_endpoint.lock().unwrap().clone()
    }

    pub fn mark_stopped(&self) {
        *self.stopped_at.lock().unwrap() = Some(Utc::now());
    }

    pub fn stopped_at(&self) -> Option<DateTime<Utc>> {
        *self.stopped_at.lock().unwrap()
    }
}
