//! Structured logging setup: timestamped, aligned, color-coded by level,
//! honoring `RUST_LOG` and `NO_COLOR`.

pub mod logger;
