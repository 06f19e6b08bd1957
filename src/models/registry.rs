//! Minimal static route registry: builds a [`RoutePool`] per configured
//! virtual host at startup.
//!
//! A production route registry tracks instances coming and going at
//! runtime (via a registration protocol); that is explicitly out of scope
//! here. This registry exists so the HTTP front end has somewhere to look
//! up a pool by `Host` header.

use std::collections::HashMap;
use std::sync::Arc;

use log::warn;

use crate::config::settings::{EndpointConfig, Settings};
use crate::models::endpoint::{Endpoint, Scheme};
use crate::models::pool::RoutePool;

pub struct RouteRegistry {
    pools: HashMap<String, Arc<RoutePool>>,
}

impl RouteRegistry {
    pub fn from_settings(settings: &Settings) -> Self {
        let pools = settings
            .routes
            .iter()
            .map(|(host, route)| {
                let endpoints = route
                    .endpoints
                    .iter()
                    .map(|cfg| Arc::new(to_endpoint(cfg)))
                    .collect();
                let mut pool = RoutePool::new(route.context_path.clone(), endpoints);
                if let Some(raw) = &route.route_service_url {
                    match raw.parse() {
                        Ok(url) => {
                            pool = pool.with_route_service(url, route.route_to_internal_route_service)
                        }
                        Err(e) => warn!("route '{host}': invalid route_service_url '{raw}': {e}"),
                    }
                }
                (host.clone(), Arc::new(pool))
            })
            .collect();
        Self { pools }
    }

    pub fn lookup(&self, host: &str) -> Option<Arc<RoutePool>> {
        self.pools.get(host).cloned()
    }
}

fn to_endpoint(cfg: &EndpointConfig) -> Endpoint {
    let scheme = if cfg.tls { Scheme::Tls } else { Scheme::Http };
    let mut endpoint = Endpoint::new(
        cfg.address.clone(),
        scheme,
        cfg.application_id.clone(),
        cfg.private_instance_id.clone(),
        cfg.private_instance_index.clone(),
    );
    endpoint.tags = cfg.tags.clone();
    endpoint
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::RouteConfig;

    #[test]
    fn unknown_host_has_no_pool() {
        let settings = Settings::default();
        let registry = RouteRegistry::from_settings(&settings);
        assert!(registry.lookup("example.com").is_none());
    }

    #[test]
    fn configured_host_resolves_to_its_endpoints() {
        let mut settings = Settings::default();
        settings.routes.insert(
            "app.example.com".to_string(),
            RouteConfig {
                context_path: "/".to_string(),
                endpoints: vec![EndpointConfig {
                    address: "10.0.0.1:8080".to_string(),
                    tls: false,
                    application_id: "app-1".to_string(),
                    private_instance_id: "instance-1".to_string(),
                    private_instance_index: "0".to_string(),
                    tags: HashMap::new(),
                }],
                route_service_url: None,
                route_to_internal_route_service: false,
            },
        );
        let registry = RouteRegistry::from_settings(&settings);
        let pool = registry.lookup("app.example.com").expect("pool present");
        assert!(!pool.is_empty());
    }
}
