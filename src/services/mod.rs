pub mod classify;
pub mod iterator;
pub mod render;
pub mod round_trip;
pub mod sticky;
pub mod tls_verify;
pub mod transport;
