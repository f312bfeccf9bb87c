//! Forward proxy, response cache and CONNECT tunnel tests over real sockets.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use wirepool::cache::ResponseCache;
use wirepool::load_balancer::LoadBalancer;
use wirepool::net::Dialer;
use wirepool::proxy::{ProxyError, ProxyOptions, ProxyServer};

mod common;

async fn start_proxy(balancer: LoadBalancer) -> (ProxyServer, SocketAddr) {
    start_proxy_with(balancer, ProxyOptions::default()).await
}

async fn start_proxy_with(balancer: LoadBalancer, base: ProxyOptions) -> (ProxyServer, SocketAddr) {
    let options = ProxyOptions {
        upstream_timeout: Duration::from_secs(2),
        connect_timeout: Duration::from_millis(500),
        shutdown_grace: Duration::from_secs(1),
        ..base
    };
    let cache = Arc::new(ResponseCache::new(100, Duration::from_secs(300)));
    let dialer = Dialer::with_default_roots(None).unwrap();
    let proxy = ProxyServer::new(options, cache, balancer, dialer);
    let addr = proxy.listen("127.0.0.1:0".parse().unwrap()).await.unwrap();
    (proxy, addr)
}

/// Send a raw request and read the whole response (the request asks for
/// `Connection: close`).
async fn raw_exchange(proxy: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .expect("proxy response timed out")
        .unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

fn proxied_client(proxy: SocketAddr) -> reqwest::Client {
    reqwest::Client::builder()
        .proxy(reqwest::Proxy::http(format!("http://{proxy}")).unwrap())
        .build()
        .unwrap()
}

#[tokio::test]
async fn cacheable_get_is_served_from_cache() {
    let (backend, hits) = common::start_http_backend(Some("max-age=60"), "fresh").await;
    let (proxy, proxy_addr) = start_proxy(LoadBalancer::new()).await;
    let client = proxied_client(proxy_addr);
    let url = format!("http://{backend}/item");

    let first = client.get(&url).send().await.unwrap();
    assert_eq!(first.status(), 200);
    assert_eq!(first.headers()["x-cache"], "MISS");
    assert!(first.headers().contains_key("x-request-id"));
    assert_eq!(first.text().await.unwrap(), "fresh");

    let second = client.get(&url).send().await.unwrap();
    assert_eq!(second.status(), 200);
    assert_eq!(second.headers()["x-cache"], "HIT");
    assert_eq!(second.text().await.unwrap(), "fresh");

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    let stats = proxy.cache().stats();
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.hits, 1);
}

#[tokio::test]
async fn no_store_responses_are_not_cached() {
    let (backend, hits) = common::start_http_backend(Some("no-store"), "volatile").await;
    let (proxy, proxy_addr) = start_proxy(LoadBalancer::new()).await;
    let client = proxied_client(proxy_addr);
    let url = format!("http://{backend}/live");

    for _ in 0..2 {
        let res = client.get(&url).send().await.unwrap();
        assert_eq!(res.headers()["x-cache"], "MISS");
        assert_eq!(res.text().await.unwrap(), "volatile");
    }
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert!(proxy.cache().is_empty());
}

#[tokio::test]
async fn flushing_the_cache_forces_a_refetch() {
    let (backend, hits) = common::start_http_backend(None, "default-ttl").await;
    let (proxy, proxy_addr) = start_proxy(LoadBalancer::new()).await;
    let client = proxied_client(proxy_addr);
    let url = format!("http://{backend}/");

    client.get(&url).send().await.unwrap().text().await.unwrap();
    assert_eq!(proxy.cache().len(), 1);

    assert_eq!(proxy.cache().flush(), 1);
    let res = client.get(&url).send().await.unwrap();
    assert_eq!(res.headers()["x-cache"], "MISS");
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn oversized_max_age_is_clamped_not_fatal() {
    let (backend, hits) = common::start_http_backend(Some("max-age=18446744073709551615"), "forever").await;
    let (proxy, proxy_addr) = start_proxy(LoadBalancer::new()).await;
    let client = proxied_client(proxy_addr);
    let url = format!("http://{backend}/eternal");

    let first = client.get(&url).send().await.unwrap();
    assert_eq!(first.status(), 200);
    assert_eq!(first.text().await.unwrap(), "forever");

    let second = client.get(&url).send().await.unwrap();
    assert_eq!(second.headers()["x-cache"], "HIT");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(proxy.cache().len(), 1);
}

#[tokio::test]
async fn bodies_over_the_cache_limit_stream_through() {
    let (backend, hits) = common::start_http_backend(Some("max-age=60"), "longer than sixteen bytes").await;
    let options = ProxyOptions {
        max_body_bytes: 16,
        ..ProxyOptions::default()
    };
    let (proxy, proxy_addr) = start_proxy_with(LoadBalancer::new(), options).await;
    let client = proxied_client(proxy_addr);
    let url = format!("http://{backend}/large");

    for _ in 0..2 {
        let res = client.get(&url).send().await.unwrap();
        assert_eq!(res.status(), 200);
        assert!(!res.headers().contains_key("x-cache"));
        assert_eq!(res.text().await.unwrap(), "longer than sixteen bytes");
    }
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert!(proxy.cache().is_empty());
}

#[tokio::test]
async fn slow_body_after_the_head_is_not_a_timeout() {
    // Close-delimited body: its size is only known once it outgrows the limit.
    let backend = common::start_slow_body_server("first-", Duration::from_millis(500), "and the rest").await;
    let cache = Arc::new(ResponseCache::new(10, Duration::from_secs(60)));
    let options = ProxyOptions {
        upstream_timeout: Duration::from_millis(200),
        max_body_bytes: 8,
        ..ProxyOptions::default()
    };
    let proxy = ProxyServer::new(options, cache, LoadBalancer::new(), Dialer::with_default_roots(None).unwrap());
    let proxy_addr = proxy.listen("127.0.0.1:0".parse().unwrap()).await.unwrap();

    let res = proxied_client(proxy_addr)
        .get(format!("http://{backend}/slow"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "first-and the rest");
    assert!(proxy.cache().is_empty());
}

#[tokio::test]
async fn post_requests_bypass_the_cache() {
    let (backend, hits) = common::start_http_backend(Some("max-age=60"), "ok").await;
    let (proxy, proxy_addr) = start_proxy(LoadBalancer::new()).await;
    let client = proxied_client(proxy_addr);

    for _ in 0..2 {
        let res = client
            .post(format!("http://{backend}/submit"))
            .body("payload")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
        assert!(!res.headers().contains_key("x-cache"));
    }
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert!(proxy.cache().is_empty());
}

#[tokio::test]
async fn unreachable_upstream_is_a_bad_gateway() {
    let refused = common::refused_addr().await;
    let (_proxy, proxy_addr) = start_proxy(LoadBalancer::new()).await;

    let response = raw_exchange(
        proxy_addr,
        &format!("GET http://{refused}/ HTTP/1.1\r\nHost: {refused}\r\nConnection: close\r\n\r\n"),
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 502"), "got: {response}");
}

#[tokio::test]
async fn silent_upstream_is_a_gateway_timeout() {
    let silent = common::start_silent_server().await;
    let cache = Arc::new(ResponseCache::new(10, Duration::from_secs(60)));
    let options = ProxyOptions {
        upstream_timeout: Duration::from_millis(200),
        ..ProxyOptions::default()
    };
    let proxy = ProxyServer::new(options, cache, LoadBalancer::new(), Dialer::with_default_roots(None).unwrap());
    let proxy_addr = proxy.listen("127.0.0.1:0".parse().unwrap()).await.unwrap();

    let response = raw_exchange(
        proxy_addr,
        &format!("GET http://{silent}/ HTTP/1.1\r\nHost: {silent}\r\nConnection: close\r\n\r\n"),
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 504"), "got: {response}");
}

#[tokio::test]
async fn origin_form_requests_use_the_rotation() {
    let (backend, hits) = common::start_http_backend(None, "from-rotation").await;
    let balancer = LoadBalancer::new();
    balancer.add_target(backend.ip().to_string(), backend.port());
    let (_proxy, proxy_addr) = start_proxy(balancer).await;

    let response = raw_exchange(
        proxy_addr,
        "GET /anything HTTP/1.1\r\nHost: service.internal\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 200"), "got: {response}");
    assert!(response.ends_with("from-rotation"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn origin_form_without_targets_is_a_bad_gateway() {
    let (_proxy, proxy_addr) = start_proxy(LoadBalancer::new()).await;
    let response = raw_exchange(
        proxy_addr,
        "GET / HTTP/1.1\r\nHost: nowhere\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 502"), "got: {response}");
}

#[tokio::test]
async fn connect_relays_pipelined_bytes() {
    let echo = common::start_echo_server().await;
    let (proxy, proxy_addr) = start_proxy(LoadBalancer::new()).await;

    let mut stream = TcpStream::connect(proxy_addr).await.unwrap();
    // Payload sent in the same write as the request head.
    stream
        .write_all(format!("CONNECT {echo} HTTP/1.1\r\nHost: {echo}\r\n\r\nhello").as_bytes())
        .await
        .unwrap();

    let mut received = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "proxy closed the tunnel early");
            received.extend_from_slice(&chunk[..n]);
            if let Some(pos) = received.windows(4).position(|w| w == b"\r\n\r\n") {
                if received.len() >= pos + 4 + 5 {
                    return pos + 4;
                }
            }
        }
    })
    .await
    .expect("tunnel timed out");

    let head = String::from_utf8_lossy(&received[..head_end]).into_owned();
    assert!(head.starts_with("HTTP/1.1 200"), "got: {head}");
    assert_eq!(&received[head_end..], b"hello");
    assert!(proxy.active_connections() >= 1);

    stream.write_all(b" again").await.unwrap();
    let mut echoed = [0u8; 6];
    stream.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b" again");

    drop(stream);
    assert!(common::eventually(Duration::from_secs(2), || proxy.active_connections() == 0).await);
}

#[tokio::test]
async fn connect_to_unreachable_host_fails_and_closes() {
    let refused = common::refused_addr().await;
    let (_proxy, proxy_addr) = start_proxy(LoadBalancer::new()).await;

    // No `Connection: close` here; the proxy must end the connection itself.
    let response = raw_exchange(
        proxy_addr,
        &format!("CONNECT {refused} HTTP/1.1\r\nHost: {refused}\r\n\r\n"),
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 502"), "got: {response}");
    assert!(response.to_ascii_lowercase().contains("connection: close"));
}

#[tokio::test]
async fn close_all_stops_listeners() {
    let (proxy, proxy_addr) = start_proxy(LoadBalancer::new()).await;
    assert_eq!(proxy.active_listeners().len(), 1);
    assert_eq!(proxy.active_listeners()[0].address, proxy_addr);

    assert!(proxy.close_all().await);
    assert!(proxy.active_listeners().is_empty());
    assert!(TcpStream::connect(proxy_addr).await.is_err());

    let err = proxy.listen("127.0.0.1:0".parse().unwrap()).await.unwrap_err();
    assert!(matches!(err, ProxyError::ShuttingDown));
}
