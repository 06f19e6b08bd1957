//! # fleetproxy
//!
//! Request dispatch core for a layer-7 reverse proxy that fronts a fleet of
//! dynamically registered application instances. Clients address the proxy
//! by virtual host; the proxy selects a live backend endpoint, forwards the
//! request, retries across alternate endpoints on transport failure, applies
//! mutual TLS with per-endpoint identity verification, and maintains session
//! affinity via a cookie.
//!
//! ## Module Organization
//!
//! - [`config`] - configuration loading and validation
//! - [`models`] - endpoints, route pools, request-scoped context, error taxonomy
//! - [`services`] - the round-trip engine and its collaborators (iterator
//!   strategies, transport cache, TLS identity verification, sticky
//!   sessions, error classification and rendering)
//! - [`routes`] - the actix-web HTTP front end
//! - [`logs`] - structured logging setup
//!
//! ## Quick Start
//!
//! ```no_run
//! use fleetproxy::config::settings::load_settings;
//! use fleetproxy::services::round_trip::Engine;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = load_settings()?;
//!     settings.validate().map_err(|e| e.to_string())?;
//!     let _engine = Engine::new(settings)?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod logs;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;
