//! Loads and validates the proxy's configuration from a JSON file on disk.
//!
//! The file path is configurable via `FLEETPROXY_CONFIG_PATH`, defaulting to
//! `./config.json`, with the same defensive loading used across the rest of
//! the platform: confine the resolved path to the working directory, bound
//! the file size, and surface parse errors with their JSON context intact.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

const MAX_CONFIG_SIZE: u64 = 10 * 1024 * 1024;

/// mTLS material for connections the proxy makes to backends and internal
/// route services: the proxy's own client identity and the CA pool backend
/// certificates are validated against. Omitting `ca_certs` falls back to
/// the platform's native trust store.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct BackendTlsSettings {
    #[serde(default)]
    pub client_auth_certificate: Option<String>,
    #[serde(default)]
    pub client_auth_key: Option<String>,
    #[serde(default)]
    pub ca_certs: Vec<String>,
}

/// One registered application instance, as it appears in the static route
/// table. The full dynamic route registry (instances coming and going at
/// runtime) is out of scope for this crate; this is enough to stand up a
/// working server from a config file.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EndpointConfig {
    pub address: String,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub application_id: String,
    #[serde(default)]
    pub private_instance_id: String,
    #[serde(default)]
    pub private_instance_index: String,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

/// All endpoints registered behind one virtual host.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RouteConfig {
    #[serde(default = "default_context_path")]
    pub context_path: String,
    pub endpoints: Vec<EndpointConfig>,
    /// External route service fronting this host, if any. When set, the
    /// engine bypasses pool iteration and calls this URL directly instead of
    /// `endpoints`, retrying only on retriable transport errors (there is no
    /// alternate route service to fail over to, so a retry targets the same
    /// URL again).
    #[serde(default)]
    pub route_service_url: Option<String>,
    /// Marks `route_service_url` as an internal route service already
    /// reachable through the platform's own network: the engine reuses the
    /// shared internal route-service transport (see `route_services`)
    /// instead of building a fresh, isolated transport per request.
    #[serde(default)]
    pub route_to_internal_route_service: bool,
}

/// Transport settings for internal route services, shared across every
/// route whose `route_to_internal_route_service` is set.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RouteServicesSettings {
    /// Per-attempt deadline for internal route-service requests. Defaults
    /// to the same value as `endpoint_timeout_ms`.
    #[serde(default = "default_endpoint_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RouteServicesSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_endpoint_timeout_ms(),
        }
    }
}

fn default_context_path() -> String {
    "/".to_string()
}

fn default_load_balance() -> String {
    "round_robin".to_string()
}

fn default_endpoint_timeout_ms() -> u64 {
    30_000
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_bind_port() -> u16 {
    8080
}

/// Complete runtime configuration for the dispatch core and its HTTP front
/// end.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Settings {
    /// Load-balancing strategy name: `round_robin`, `least_connections`,
    /// `random`, `weighted`, or `ip_hash`. Unrecognized names fall back to
    /// round robin at dispatch time rather than failing requests, but
    /// `validate()` still rejects them so a configuration typo is caught at
    /// startup.
    #[serde(default = "default_load_balance")]
    pub load_balance: String,

    /// Per-attempt deadline. Exceeding it drops the in-flight request
    /// future and counts as a terminal (non-retriable) failure.
    #[serde(default = "default_endpoint_timeout_ms")]
    pub endpoint_timeout_ms: u64,

    /// Forces `Secure` on the sticky-session cookie regardless of whether
    /// the backend's own affinity cookie was secure.
    #[serde(default)]
    pub secure_cookies: bool,

    /// Cookie names that indicate a backend manages its own session
    /// affinity (e.g. `JSESSIONID`). Presence of one of these plus a
    /// `__VCAP_ID__` cookie establishes the sticky hint for a request.
    #[serde(default)]
    pub sticky_session_cookie_names: HashSet<String>,

    #[serde(default)]
    pub backends: BackendTlsSettings,

    #[serde(default)]
    pub route_services: RouteServicesSettings,

    /// Virtual host name (matched against the inbound `Host` header) to its
    /// route configuration.
    #[serde(default)]
    pub routes: HashMap<String, RouteConfig>,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_bind_port")]
    pub bind_port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            load_balance: default_load_balance(),
            endpoint_timeout_ms: default_endpoint_timeout_ms(),
            secure_cookies: false,
            sticky_session_cookie_names: HashSet::new(),
            backends: BackendTlsSettings::default(),
            route_services: RouteServicesSettings::default(),
            routes: HashMap::new(),
            bind_address: default_bind_address(),
            bind_port: default_bind_port(),
        }
    }
}

/// Strategy names the iterator factory knows how to build.
pub const KNOWN_STRATEGIES: &[&str] =
    &["round_robin", "least_connections", "random", "weighted", "ip_hash"];

impl Settings {
    /// Fails fast on configuration that would make every request fail the
    /// same way, rather than surfacing it request-by-request at runtime.
    pub fn validate(&self) -> Result<(), String> {
        if !KNOWN_STRATEGIES.contains(&self.load_balance.as_str()) {
            return Err(format!(
                "unknown load_balance strategy '{}': expected one of {:?}",
                self.load_balance, KNOWN_STRATEGIES
            ));
        }
        let has_cert = self.backends.client_auth_certificate.is_some();
        let has_key = self.backends.client_auth_key.is_some();
        if has_cert != has_key {
            return Err(
                "backends.client_auth_certificate and backends.client_auth_key must both be set or both be absent"
                    .to_string(),
            );
        }
        for (host, route) in &self.routes {
            if route.endpoints.is_empty() {
                return Err(format!("route '{host}' has no endpoints"));
            }
            for endpoint in &route.endpoints {
                if endpoint.tls && endpoint.private_instance_id.is_empty() {
                    return Err(format!(
                        "route '{host}': endpoint '{}' is marked tls but has no private_instance_id",
                        endpoint.address
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Loads configuration from `FLEETPROXY_CONFIG_PATH` (default
/// `./config.json`).
pub fn load_settings() -> Result<Settings, Box<dyn std::error::Error>> {
    let config_path =
        std::env::var("FLEETPROXY_CONFIG_PATH").unwrap_or_else(|_| "./config.json".to_string());

    debug!("loading configuration from: {config_path}");

    let path = Path::new(&config_path);
    if !path.exists() {
        return Err(format!("cannot resolve config path '{config_path}'").into());
    }

    let canonical_path = path
        .canonicalize()
        .map_err(|e| format!("cannot resolve config path '{config_path}': {e}"))?;
    let current_dir =
        std::env::current_dir().map_err(|e| format!("cannot get current directory: {e}"))?;
    if !canonical_path.starts_with(&current_dir) {
        warn!("config path '{config_path}' is outside the working directory");
        return Err("config path outside working directory".into());
    }

    let metadata = fs::metadata(&canonical_path)
        .map_err(|e| format!("cannot read config file metadata: {e}"))?;
    if metadata.len() > MAX_CONFIG_SIZE {
        return Err(format!(
            "config file too large: {} bytes (max {MAX_CONFIG_SIZE} bytes)",
            metadata.len()
        )
        .into());
    }

    let config_data = fs::read_to_string(&canonical_path)
        .map_err(|e| format!("cannot read config file: {e}"))?;
    let settings: Settings =
        serde_json::from_str(&config_data).map_err(|e| format!("invalid JSON: {e}"))?;

    debug!("loaded configuration: load_balance={}", settings.load_balance);
    Ok(settings)
}
