//! Closed error taxonomy for the dispatch core.
//!
//! `ErrorKind` is what the classifier (`services::classify`) and renderer
//! (`services::render`) agree on; `TransportError` and `DispatchError` carry
//! that kind plus enough context to log and retry correctly.

use thiserror::Error;

/// The closed taxonomy of error kinds the engine can finalize on, ordered
/// from most specific to most generic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MissingContext,
    NoEndpointsAvailable,
    MissingInstanceId,
    HostnameMismatch,
    InvalidCert,
    TlsCertRequired,
    TlsHandshakeFailed,
    ContextCancelled,
    DeadlineExceeded,
    ConnectionFailed,
    UnknownTransportError,
}

/// An error surfaced while executing a request against a backend or
/// route-service transport. Carries the [`ErrorKind`] the classifier and
/// renderer act on.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect refused: {0}")]
    ConnectRefused(String),
    #[error("connection reset before any response: {0}")]
    ConnectionReset(String),
    #[error("TLS handshake failed: {0}")]
    TlsHandshakeFailed(String),
    #[error("DNS resolution failed: {0}")]
    DnsResolutionFailed(String),
    #[error("dial timed out: {0}")]
    DialTimeout(String),
    #[error("backend certificate rejected: no chain validated")]
    InvalidCert,
    #[error("backend hostname/identity mismatch")]
    HostnameMismatch,
    #[error("backend demanded a client certificate we could not present")]
    TlsCertRequired,
    #[error("endpoint registered with no instance id")]
    MissingInstanceId,
    #[error("request cancelled")]
    ContextCancelled,
    #[error("deadline exceeded after bytes sent")]
    DeadlineExceededPostSend,
    #[error("transport error after response headers were read: {0}")]
    PostHeaderError(String),
    #[error("unknown transport error: {0}")]
    Unknown(String),
}

impl TransportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::ConnectRefused(_)
            | TransportError::ConnectionReset(_)
            | TransportError::DnsResolutionFailed(_)
            | TransportError::DialTimeout(_) => ErrorKind::ConnectionFailed,
            TransportError::TlsHandshakeFailed(_) => ErrorKind::TlsHandshakeFailed,
            TransportError::InvalidCert => ErrorKind::InvalidCert,
            TransportError::HostnameMismatch => ErrorKind::HostnameMismatch,
            TransportError::TlsCertRequired => ErrorKind::TlsCertRequired,
            TransportError::MissingInstanceId => ErrorKind::MissingInstanceId,
            TransportError::ContextCancelled => ErrorKind::ContextCancelled,
            TransportError::DeadlineExceededPostSend => ErrorKind::DeadlineExceeded,
            TransportError::PostHeaderError(_) => ErrorKind::UnknownTransportError,
            TransportError::Unknown(_) => ErrorKind::UnknownTransportError,
        }
    }
}

/// The engine's final, renderable error: selection failure or the last
/// transport error, whichever applies (see `Engine::round_trip`).
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("request info missing from request context")]
    MissingContext,
    #[error("no endpoints available")]
    NoEndpointsAvailable,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::MissingContext => ErrorKind::MissingContext,
            DispatchError::NoEndpointsAvailable => ErrorKind::NoEndpointsAvailable,
            DispatchError::Transport(e) => e.kind(),
        }
    }
}
