//! Small helpers shared across the HTTP front end.

pub mod host;
