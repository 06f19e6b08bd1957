//! Catch-all proxy route: resolves the inbound `Host` header against the
//! route registry, attaches a [`RequestInfo`] to the request context, and
//! hands off to the round-trip engine.

use std::sync::Arc;

use actix_web::{web, HttpMessage, HttpRequest, HttpResponse};

use crate::models::error::DispatchError;
use crate::models::registry::RouteRegistry;
use crate::models::request_info::RequestInfo;
use crate::services::render::ErrorRenderer;
use crate::services::round_trip::Engine;
use crate::utils::host::strip_port;

pub async fn handle_request(
    req: HttpRequest,
    body: web::Bytes,
    engine: web::Data<Engine>,
    registry: web::Data<RouteRegistry>,
) -> HttpResponse {
    let host = strip_port(req.connection_info().host()).to_string();
    let Some(pool) = registry.lookup(&host) else {
        return ErrorRenderer::render(&DispatchError::NoEndpointsAvailable);
    };

    let mut info = RequestInfo::new(pool.clone());
    if let Some(url) = pool.route_service_url.clone() {
        info = info.with_route_service(url, pool.route_to_internal_route_service);
    }
    req.extensions_mut().insert(Arc::new(info));

    engine.round_trip(&req, body).await
}

pub fn configure_proxy(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::PayloadConfig::new(16 * 1024 * 1024))
        .service(web::resource("/{tail:.*}").to(handle_request));
}
