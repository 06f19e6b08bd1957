//! Shared fixtures for the end-to-end TLS scenarios: a tiny certificate
//! authority built with `rcgen`, and a one-shot TLS (or plain TCP) backend
//! spawned on a background thread.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;

use rcgen::{BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig, ServerConnection, StreamOwned};

pub struct CertAuthority {
    cert: rcgen::Certificate,
    key: KeyPair,
}

pub struct IssuedCert {
    pub cert_pem: String,
    pub key_pem: String,
}

impl CertAuthority {
    pub fn new() -> Self {
        let mut params = CertificateParams::new(Vec::<String>::new()).expect("ca params");
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "fleetproxy-test-ca");
        params.distinguished_name = dn;
        let key = KeyPair::generate().expect("ca key");
        let cert = params.self_signed(&key).expect("self-sign ca");
        Self { cert, key }
    }

    pub fn ca_pem(&self) -> String {
        self.cert.pem()
    }

    /// Issues a leaf certificate signed by this CA. `cn` sets the
    /// CommonName (omit for CN-less certs); `dns_sans` sets DNS SAN entries.
    pub fn issue_leaf(&self, cn: Option<&str>, dns_sans: &[&str]) -> IssuedCert {
        let mut params = CertificateParams::new(
            dns_sans.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
        )
        .expect("leaf params");
        if let Some(cn) = cn {
            let mut dn = DistinguishedName::new();
            dn.push(DnType::CommonName, cn);
            params.distinguished_name = dn;
        }
        let key = KeyPair::generate().expect("leaf key");
        let cert = params.signed_by(&key, &self.cert, &self.key).expect("sign leaf");
        IssuedCert {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
        }
    }
}

fn parse_chain_and_key(cert_pem: &str, key_pem: &str) -> (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>) {
    let chain: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_pem.as_bytes())
        .map(|r| r.expect("cert der"))
        .collect();
    let key_der = rustls_pemfile::pkcs8_private_keys(&mut key_pem.as_bytes())
        .next()
        .expect("key present")
        .expect("key der");
    (chain, PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_der.secret_pkcs8_der().to_vec())))
}

/// Spawns a backend that completes a TLS handshake, optionally demanding a
/// client certificate signed by `client_ca`. Writes one fixed HTTP response
/// then closes. Runs once, on a background thread.
pub fn spawn_tls_backend(leaf: &IssuedCert, client_ca: Option<&CertAuthority>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");

    let (chain, key) = parse_chain_and_key(&leaf.cert_pem, &leaf.key_pem);

    let builder = ServerConfig::builder();
    let builder = match client_ca {
        Some(ca) => {
            let mut roots = RootCertStore::empty();
            let ca_der: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut ca.ca_pem().as_bytes())
                .map(|r| r.expect("ca der"))
                .collect();
            roots.add_parsable_certificates(ca_der);
            let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                .build()
                .expect("client verifier");
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };
    let server_config = builder
        .with_single_cert(chain, key)
        .expect("server config");

    std::thread::spawn(move || {
        if let Ok((stream, _)) = listener.accept() {
            let conn = match ServerConnection::new(Arc::new(server_config)) {
                Ok(c) => c,
                Err(_) => return,
            };
            let mut tls = StreamOwned::new(conn, stream);
            let mut buf = [0u8; 4096];
            // Drives the handshake; ignore errors here, the client side is
            // what the test actually asserts on.
            let _ = tls.read(&mut buf);
            let _ = tls.write_all(b"HTTP/1.1 200 OK\r\nContent-Length:2\r\n\r\nok");
        }
    });

    addr
}

/// Spawns a backend that speaks plain TCP, never negotiating TLS. A client
/// dialing it expecting TLS sees a handshake failure.
pub fn spawn_plaintext_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    std::thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let _ = stream.write_all(b"HTTP/1.1 200 OK\r\nContent-Length:2\r\n\r\nok");
        }
    });
    addr
}
