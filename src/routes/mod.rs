//! HTTP front end: health endpoints for monitoring and the catch-all proxy
//! route that hands every other request to the [`crate::services::round_trip::Engine`].

pub mod health;
pub mod proxy;
