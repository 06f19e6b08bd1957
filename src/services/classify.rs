//! Error classifier: decides whether a transport failure is retriable.
//!
//! Retriable iff the failure happened before any bytes were committed to
//! the wire: connect refused, connection reset before any response, a TLS
//! handshake failure on first byte, DNS resolution failure, or a dial
//! timeout. Everything else — including any error surfacing after response
//! headers were read — is terminal, because the engine does not buffer or
//! replay request bodies.
//!
//! TLS-layer failures get special handling: a rejected endpoint identity
//! (`IdentityFailure`, stashed during our custom certificate verification)
//! and a peer-sent TLS alert rejecting our client certificate both carry
//! more specific meaning than a generic handshake failure, and the renderer
//! maps each to its own contracted status code.

use rustls::Error as TlsError;

use crate::models::error::TransportError;
use crate::services::tls_verify::IdentityFailure;

pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn is_retriable(err: &TransportError) -> bool {
        matches!(
            err,
            TransportError::ConnectRefused(_)
                | TransportError::ConnectionReset(_)
                | TransportError::TlsHandshakeFailed(_)
                | TransportError::DnsResolutionFailed(_)
                | TransportError::DialTimeout(_)
        )
    }

    /// Translates a `reqwest::Error` (which conflates many lower-level
    /// causes into a handful of flags) into our closed `TransportError`
    /// taxonomy.
    pub fn from_reqwest(err: reqwest::Error) -> TransportError {
        if let Some(identity) = IdentityFailure::find(&err) {
            return match identity {
                IdentityFailure::InvalidCert => TransportError::InvalidCert,
                IdentityFailure::MissingInstanceId => TransportError::MissingInstanceId,
                IdentityFailure::HostnameMismatch => TransportError::HostnameMismatch,
            };
        }

        if let Some(tls_err) = find_tls_error(&err) {
            return match tls_err {
                // The backend rejected the client certificate we presented
                // (or demanded one we have none for): a peer-sent alert,
                // not a chain-validation failure of our own making.
                TlsError::AlertReceived(_) => TransportError::TlsCertRequired,
                other => TransportError::TlsHandshakeFailed(other.to_string()),
            };
        }

        if err.is_timeout() {
            return TransportError::DialTimeout(err.to_string());
        }
        if err.is_connect() {
            let msg = err.to_string();
            if msg.contains("refused") {
                return TransportError::ConnectRefused(msg);
            }
            if msg.contains("dns") || msg.contains("resolve") || msg.contains("lookup") {
                return TransportError::DnsResolutionFailed(msg);
            }
            return TransportError::ConnectRefused(msg);
        }
        if err.is_request() && !err.is_body() {
            return TransportError::ConnectionReset(err.to_string());
        }
        TransportError::PostHeaderError(err.to_string())
    }
}

/// Walks a boxed error's `source()` chain looking for a `rustls::Error` that
/// isn't one of our own stashed `IdentityFailure`s — i.e. a handshake
/// failure the peer or rustls itself raised.
fn find_tls_error<'a>(err: &'a (dyn std::error::Error + 'static)) -> Option<&'a TlsError> {
    let mut cause: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = cause {
        if let Some(tls_err) = e.downcast_ref::<TlsError>() {
            return Some(tls_err);
        }
        cause = e.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_failures_are_retriable() {
        assert!(ErrorClassifier::is_retriable(&TransportError::ConnectRefused(
            "x".into()
        )));
        assert!(ErrorClassifier::is_retriable(&TransportError::ConnectionReset(
            "x".into()
        )));
        assert!(ErrorClassifier::is_retriable(&TransportError::TlsHandshakeFailed(
            "x".into()
        )));
        assert!(ErrorClassifier::is_retriable(&TransportError::DnsResolutionFailed(
            "x".into()
        )));
        assert!(ErrorClassifier::is_retriable(&TransportError::DialTimeout(
            "x".into()
        )));
    }

    #[test]
    fn identity_and_post_send_failures_are_terminal() {
        assert!(!ErrorClassifier::is_retriable(&TransportError::HostnameMismatch));
        assert!(!ErrorClassifier::is_retriable(&TransportError::InvalidCert));
        assert!(!ErrorClassifier::is_retriable(&TransportError::TlsCertRequired));
        assert!(!ErrorClassifier::is_retriable(&TransportError::ContextCancelled));
        assert!(!ErrorClassifier::is_retriable(
            &TransportError::DeadlineExceededPostSend
        ));
        assert!(!ErrorClassifier::is_retriable(&TransportError::PostHeaderError(
            "x".into()
        )));
    }
}
