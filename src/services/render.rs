//! Error renderer: maps the engine's final error to an HTTP response.
//!
//! The non-standard status codes (496, 499, 525, 526) are a fixed operator
//! contract — never substitute 502/504 for them.

use actix_web::HttpResponse;

use crate::models::error::{DispatchError, ErrorKind};

pub const BAD_GATEWAY_MESSAGE: &str =
    "502 Bad Gateway: Registered endpoint failed to handle the request.";
pub const HOSTNAME_ERROR_MESSAGE: &str = "503 Service Unavailable";
pub const INVALID_CERTIFICATE_MESSAGE: &str = "526 Invalid SSL Certificate";
pub const SSL_HANDSHAKE_MESSAGE: &str = "525 SSL Handshake Failed";
pub const SSL_CERT_REQUIRED_MESSAGE: &str = "496 SSL Certificate Required";
pub const CONTEXT_CANCELLED_MESSAGE: &str = "499 Request Cancelled";

pub struct ErrorRenderer;

impl ErrorRenderer {
    pub fn render(err: &DispatchError) -> HttpResponse {
        match err.kind() {
            ErrorKind::NoEndpointsAvailable => {
                HttpResponse::BadGateway().body(BAD_GATEWAY_MESSAGE)
            }
            ErrorKind::HostnameMismatch | ErrorKind::MissingInstanceId => {
                HttpResponse::ServiceUnavailable().body(HOSTNAME_ERROR_MESSAGE)
            }
            ErrorKind::InvalidCert => {
                HttpResponse::build(actix_web::http::StatusCode::from_u16(526).unwrap())
                    .body(INVALID_CERTIFICATE_MESSAGE)
            }
            ErrorKind::TlsHandshakeFailed => {
                HttpResponse::build(actix_web::http::StatusCode::from_u16(525).unwrap())
                    .body(SSL_HANDSHAKE_MESSAGE)
            }
            ErrorKind::TlsCertRequired => {
                HttpResponse::build(actix_web::http::StatusCode::from_u16(496).unwrap())
                    .body(SSL_CERT_REQUIRED_MESSAGE)
            }
            ErrorKind::ContextCancelled => {
                HttpResponse::build(actix_web::http::StatusCode::from_u16(499).unwrap())
                    .body(CONTEXT_CANCELLED_MESSAGE)
            }
            ErrorKind::MissingContext
            | ErrorKind::DeadlineExceeded
            | ErrorKind::ConnectionFailed
            | ErrorKind::UnknownTransportError => {
                HttpResponse::BadGateway().body(BAD_GATEWAY_MESSAGE)
            }
        }
    }
}
