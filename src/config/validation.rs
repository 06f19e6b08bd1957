//! Comprehensive configuration validation with errors, warnings and
//! recommendations, distinct from `Settings::validate`'s fail-fast check.
//!
//! Meant to be run once at startup and logged in full, so an operator gets
//! every issue in one pass rather than fixing a config file error-by-error.

use log::{info, warn};

use crate::config::settings::{Settings, KNOWN_STRATEGIES};

/// Outcome of a comprehensive validation pass: `is_valid` mirrors
/// `Settings::validate()`, but `warnings` and `recommendations` surface
/// issues that don't block startup.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            is_valid: true,
            ..Default::default()
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.is_valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn add_recommendation(&mut self, recommendation: String) {
        self.recommendations.push(recommendation);
    }

    /// Logs every finding at the severity it deserves.
    pub fn log(&self) {
        for error in &self.errors {
            warn!("config error: {error}");
        }
        for warning in &self.warnings {
            warn!("config warning: {warning}");
        }
        for recommendation in &self.recommendations {
            info!("config recommendation: {recommendation}");
        }
    }
}

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate_comprehensive(settings: &Settings) -> ValidationResult {
        let mut result = ValidationResult::new();

        if !KNOWN_STRATEGIES.contains(&settings.load_balance.as_str()) {
            result.add_error(format!(
                "unknown load_balance strategy '{}'",
                settings.load_balance
            ));
        }

        if settings.endpoint_timeout_ms == 0 {
            result.add_warning(
                "endpoint_timeout_ms is 0; the per-attempt deadline is disabled and a stalled backend can hang a request indefinitely"
                    .to_string(),
            );
        } else if settings.endpoint_timeout_ms < 250 {
            result.add_warning(format!(
                "endpoint_timeout_ms is {}ms, which is unusually low for a real backend",
                settings.endpoint_timeout_ms
            ));
        } else if settings.endpoint_timeout_ms > 120_000 {
            result.add_recommendation(
                "endpoint_timeout_ms exceeds two minutes; consider whether clients will wait that long"
                    .to_string(),
            );
        }

        if settings.route_services.timeout_ms == 0 {
            result.add_warning(
                "route_services.timeout_ms is 0; internal route-service requests will never time out"
                    .to_string(),
            );
        }

        let has_cert = settings.backends.client_auth_certificate.is_some();
        let has_key = settings.backends.client_auth_key.is_some();
        if has_cert != has_key {
            result.add_error(
                "backends.client_auth_certificate and backends.client_auth_key must both be set or both be absent"
                    .to_string(),
            );
        }

        if settings.backends.ca_certs.is_empty() {
            result.add_recommendation(
                "backends.ca_certs is empty; the proxy will trust the platform's native root store"
                    .to_string(),
            );
        }

        if !settings.secure_cookies {
            result.add_recommendation(
                "secure_cookies is false; sticky-session cookies will not carry the Secure attribute unless a backend sets it"
                    .to_string(),
            );
        }

        if settings.sticky_session_cookie_names.is_empty() {
            result.add_recommendation(
                "sticky_session_cookie_names is empty; no request will ever be treated as sticky"
                    .to_string(),
            );
        }

        result
    }
}
