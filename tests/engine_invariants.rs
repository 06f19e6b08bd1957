//! Engine invariants exercised over plain HTTP so the test doesn't need
//! certificates: retry across endpoints, the retry bound, and behavior when
//! every endpoint or no endpoint is available.

use std::io::Write;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;

use actix_web::test::TestRequest;
use actix_web::web::Bytes;
use actix_web::HttpMessage;

use fleetproxy::config::settings::Settings;
use fleetproxy::models::endpoint::{Endpoint, Scheme};
use fleetproxy::models::pool::RoutePool;
use fleetproxy::models::request_info::RequestInfo;
use fleetproxy::services::round_trip::{Engine, MAX_RETRIES};

/// Binds a port and immediately releases it, so connecting to it fails with
/// connection refused — a retriable, pre-send transport error.
fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("addr")
}

/// A backend that answers every connection it accepts with a fixed 200.
fn spawn_ok_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            std::thread::spawn(move || {
                let _ = stream.write_all(b"HTTP/1.1 200 OK\r\nContent-Length:2\r\n\r\nok");
            });
        }
    });
    addr
}

fn endpoint_at(addr: SocketAddr, id: &str) -> Arc<Endpoint> {
    Arc::new(Endpoint::new(addr.to_string(), Scheme::Http, "app-1", id, "0"))
}

fn request_for(pool: Arc<RoutePool>) -> actix_web::HttpRequest {
    let req = TestRequest::default().uri("/").to_http_request();
    req.extensions_mut().insert(Arc::new(RequestInfo::new(pool)));
    req
}

fn request_for_route_service(pool: Arc<RoutePool>, url: reqwest::Url, internal: bool) -> actix_web::HttpRequest {
    let req = TestRequest::default().uri("/").to_http_request();
    let info = RequestInfo::new(pool).with_route_service(url, internal);
    req.extensions_mut().insert(Arc::new(info));
    req
}

#[tokio::test]
async fn succeeds_on_first_live_endpoint_without_retry() {
    let endpoint = endpoint_at(spawn_ok_backend(), "instance-1");
    let pool = Arc::new(RoutePool::new("/", vec![endpoint]));
    let engine = Engine::new(Settings::default()).unwrap();

    let req = request_for(pool);
    let response = engine.round_trip(&req, Bytes::new()).await;
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn retries_across_dead_endpoints_then_succeeds_on_a_live_one() {
    // MAX_RETRIES total attempts are available; seed one fewer dead endpoint
    // than that so the live endpoint is still reachable within the bound.
    let mut endpoints: Vec<_> = (0..MAX_RETRIES - 1)
        .map(|i| endpoint_at(closed_port(), &format!("dead-{i}")))
        .collect();
    endpoints.push(endpoint_at(spawn_ok_backend(), "instance-live"));
    let pool = Arc::new(RoutePool::new("/", endpoints));
    let engine = Engine::new(Settings::default()).unwrap();

    let req = request_for(pool);
    let response = engine.round_trip(&req, Bytes::new()).await;
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn exhausting_every_endpoint_yields_exactly_one_error_response() {
    let endpoints: Vec<_> = (0..2)
        .map(|i| endpoint_at(closed_port(), &format!("dead-{i}")))
        .collect();
    let pool = Arc::new(RoutePool::new("/", endpoints));
    let engine = Engine::new(Settings::default()).unwrap();

    let req = request_for(pool);
    let response = engine.round_trip(&req, Bytes::new()).await;
    assert_eq!(response.status().as_u16(), 502);
}

#[tokio::test]
async fn empty_pool_is_bad_gateway() {
    let pool = Arc::new(RoutePool::new("/", Vec::new()));
    let engine = Engine::new(Settings::default()).unwrap();

    let req = request_for(pool);
    let response = engine.round_trip(&req, Bytes::new()).await;
    assert_eq!(response.status().as_u16(), 502);
}

#[tokio::test]
async fn route_service_dispatch_bypasses_the_pool_entirely() {
    let live = spawn_ok_backend();
    // The pool's own endpoints are all dead; the route service is what the
    // request actually reaches, proving dispatch never touches the pool.
    let dead = endpoint_at(closed_port(), "dead-0");
    let pool = Arc::new(RoutePool::new("/", vec![dead]));
    let engine = Engine::new(Settings::default()).unwrap();

    let url: reqwest::Url = format!("http://{live}/").parse().unwrap();
    let req = request_for_route_service(pool, url, false);
    let response = engine.round_trip(&req, Bytes::new()).await;
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn internal_route_service_dispatch_uses_the_shared_transport() {
    let live = spawn_ok_backend();
    let pool = Arc::new(RoutePool::new("/", Vec::new()));
    let engine = Engine::new(Settings::default()).unwrap();

    let url: reqwest::Url = format!("http://{live}/").parse().unwrap();
    let req = request_for_route_service(pool, url, true);
    let response = engine.round_trip(&req, Bytes::new()).await;
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn route_service_exhausting_retries_against_a_dead_url_is_bad_gateway() {
    let pool = Arc::new(RoutePool::new("/", Vec::new()));
    let engine = Engine::new(Settings::default()).unwrap();

    let url: reqwest::Url = format!("http://{}/", closed_port()).parse().unwrap();
    let req = request_for_route_service(pool, url, false);
    let response = engine.round_trip(&req, Bytes::new()).await;
    assert_eq!(response.status().as_u16(), 502);
}

#[tokio::test]
async fn concurrent_requests_against_one_endpoint_all_succeed() {
    // Exercises the transport cache under concurrency: every request shares
    // the same endpoint's lazily initialized `reqwest::Client`, and the
    // one-shot `OnceLock` guarantee means no request ever blocks on or
    // triggers a second client build.
    let endpoint = endpoint_at(spawn_ok_backend(), "instance-1");
    let pool = Arc::new(RoutePool::new("/", vec![endpoint]));
    let engine = Arc::new(Engine::new(Settings::default()).unwrap());

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let mut handles = Vec::new();
            for _ in 0..16 {
                let engine = engine.clone();
                let pool = pool.clone();
                handles.push(tokio::task::spawn_local(async move {
                    let req = request_for(pool);
                    engine.round_trip(&req, Bytes::new()).await.status().as_u16()
                }));
            }
            for handle in handles {
                assert_eq!(handle.await.unwrap(), 200);
            }
        })
        .await;
}
