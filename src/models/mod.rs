//! Data models and domain types for the fleetproxy dispatch core.
//!
//! - [`endpoint`] - a single backend instance, its identity, and its lazily
//!   initialized transport slot
//! - [`pool`] - the collection of endpoints behind a virtual host
//! - [`request_info`] - per-request scratch attached to the request context
//!   by upstream middleware
//! - [`error`] - the closed error-kind taxonomy the engine classifies into

pub mod endpoint;
pub mod error;
pub mod pool;
pub mod registry;
pub mod request_info;
