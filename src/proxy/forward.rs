//! Forward (non-CONNECT) request handling.
//!
//! One upstream attempt per request. The upstream timeout covers the
//! response head only. Cacheable requests buffer the body up to the cache's
//! size limit so it can be stored; larger bodies and everything else stream
//! through.

use axum::body::Body;
use bytes::BytesMut;
use futures_util::{stream, StreamExt};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_LENGTH, HOST};
use hyper::http::uri::Scheme;
use hyper::http::response::Parts;
use hyper::{Method, Request, Response, Uri, Version};
use hyper_util::rt::TokioIo;
use std::time::Instant;
use uuid::Uuid;

use crate::cache::directive::{is_cacheable_method, is_cacheable_status};
use crate::cache::{CacheDirective, CacheKey, CachedResponse};
use crate::load_balancer::{LoadBalancer, UpstreamTarget};
use crate::net::dialer::TransportKind;
use crate::observability::metrics;
use crate::proxy::error::{ProxyError, ProxyResult};
use crate::proxy::response::{error_response, set_request_id, strip_hop_by_hop, X_CACHE};
use crate::proxy::server::ProxyInner;

enum Upstream {
    Buffered(CachedResponse),
    Streaming(Response<Body>),
}

/// Serve `req` from cache or from its upstream.
pub(crate) async fn forward(inner: &ProxyInner, req: Request<Incoming>, request_id: Uuid) -> Response<Body> {
    let start = Instant::now();
    let method = req.method().clone();
    let key = (inner.options.cache_enabled && is_cacheable_method(&method))
        .then(|| CacheKey::new(method.clone(), req.uri().to_string()));

    if let Some(key) = &key {
        let hit = inner.cache.get(key);
        metrics::record_cache_lookup(hit.is_some());
        if let Some(cached) = hit {
            tracing::debug!(key = %key, "Cache hit");
            let response = cached_response(cached, "HIT");
            metrics::record_request(method.as_str(), response.status().as_u16(), "hit", start);
            return response;
        }
        tracing::debug!(key = %key, "Cache miss");
    }

    let timeout = inner.options.upstream_timeout;
    let result = match tokio::time::timeout(timeout, fetch(inner, req, request_id)).await {
        Ok(Ok(head)) => {
            let limit = key.is_some().then_some(inner.options.max_body_bytes);
            read_body(head, &method, limit).await
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(ProxyError::UpstreamTimeout(timeout)),
    };

    let (response, cache_label) = match result {
        Ok(Upstream::Buffered(fetched)) => {
            if let Some(key) = key {
                store(inner, key, &fetched);
            }
            (cached_response(fetched, "MISS"), "miss")
        }
        Ok(Upstream::Streaming(response)) => {
            if let Some(key) = &key {
                if inner.cache.invalidate(key) {
                    tracing::debug!(key = %key, "Dropped stored response replaced by an uncacheable one");
                }
            }
            (response, "bypass")
        }
        Err(e) => {
            tracing::warn!(error = %e, "Upstream request failed");
            (error_response(e.status(), &e.to_string(), false), "bypass")
        }
    };

    tracing::debug!(
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Request forwarded"
    );
    metrics::record_request(method.as_str(), response.status().as_u16(), cache_label, start);
    response
}

fn store(inner: &ProxyInner, key: CacheKey, fetched: &CachedResponse) {
    let ttl = if !is_cacheable_status(fetched.status) || fetched.body.len() > inner.options.max_body_bytes {
        None
    } else {
        CacheDirective::from_headers(&fetched.headers).ttl(inner.cache.default_ttl())
    };

    match ttl {
        Some(ttl) => inner.cache.put(key, fetched.clone(), ttl),
        None => {
            if inner.cache.invalidate(&key) {
                tracing::debug!(key = %key, "Dropped stored response no longer cacheable");
            }
        }
    }
}

fn cached_response(cached: CachedResponse, cache_status: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(cached.body));
    *response.status_mut() = cached.status;
    *response.headers_mut() = cached.headers;
    response
        .headers_mut()
        .insert(X_CACHE, HeaderValue::from_static(cache_status));
    response
}

/// Connect, send `req` and wait for the response head.
async fn fetch(inner: &ProxyInner, req: Request<Incoming>, request_id: Uuid) -> ProxyResult<Response<Incoming>> {
    let (target, transport) = resolve_upstream(&inner.balancer, req.uri())?;
    tracing::debug!(upstream = %target, transport = ?transport, "Connecting upstream");

    let stream = inner
        .dialer
        .connect(&target, transport)
        .await
        .map_err(|source| ProxyError::UpstreamConnect {
            addr: target.authority(),
            source,
        })?;
    let (mut sender, connection) = hyper::client::conn::http1::handshake::<_, Body>(TokioIo::new(stream)).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::debug!(error = %e, "Upstream connection ended with error");
        }
    });

    let (mut parts, body) = req.into_parts();
    let authority = parts.uri.authority().map(|a| a.to_string());
    parts.uri = origin_form(&parts.uri)?;
    parts.version = Version::HTTP_11;
    strip_hop_by_hop(&mut parts.headers);
    if !parts.headers.contains_key(HOST) {
        let host = authority.unwrap_or_else(|| target.authority());
        let value = HeaderValue::from_str(&host).map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;
        parts.headers.insert(HOST, value);
    }
    set_request_id(&mut parts.headers, request_id);

    Ok(sender
        .send_request(Request::from_parts(parts, Body::new(body)))
        .await?)
}

/// Buffer the body when `limit` is set and the body fits; otherwise stream
/// it. A body that outgrows the limit mid-read is streamed with the bytes
/// already read put back in front.
async fn read_body(response: Response<Incoming>, method: &Method, limit: Option<usize>) -> ProxyResult<Upstream> {
    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);

    let Some(limit) = limit else {
        return Ok(streaming(parts, Body::new(body)));
    };
    // A HEAD response advertises the length of a body it does not carry.
    if method != Method::HEAD && declared_length(&parts).is_some_and(|len| len > limit as u64) {
        tracing::debug!(limit, "Upstream body exceeds cache limit, streaming");
        return Ok(streaming(parts, Body::new(body)));
    }

    let mut chunks = Body::new(body).into_data_stream();
    let mut buffered = BytesMut::new();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        if buffered.len() + chunk.len() > limit {
            tracing::debug!(limit, "Upstream body outgrew cache limit, streaming");
            let read = [buffered.freeze(), chunk]
                .into_iter()
                .filter(|bytes| !bytes.is_empty())
                .map(Ok::<_, axum::Error>);
            return Ok(streaming(parts, Body::from_stream(stream::iter(read).chain(chunks))));
        }
        buffered.extend_from_slice(&chunk);
    }

    Ok(Upstream::Buffered(CachedResponse {
        status: parts.status,
        headers: parts.headers,
        body: buffered.freeze(),
    }))
}

fn streaming(parts: Parts, body: Body) -> Upstream {
    Upstream::Streaming(Response::from_parts(parts, body))
}

fn declared_length(parts: &Parts) -> Option<u64> {
    parts.headers.get(CONTENT_LENGTH)?.to_str().ok()?.parse().ok()
}

/// Absolute-form targets name their upstream; origin-form requests go to
/// the next load-balanced target.
fn resolve_upstream(balancer: &LoadBalancer, uri: &Uri) -> ProxyResult<(UpstreamTarget, TransportKind)> {
    match uri.authority() {
        Some(authority) => {
            let tls = uri.scheme() == Some(&Scheme::HTTPS);
            let port = authority.port_u16().unwrap_or(if tls { 443 } else { 80 });
            let host = authority.host().trim_start_matches('[').trim_end_matches(']');
            let transport = if tls { TransportKind::Tls } else { TransportKind::Plain };
            Ok((UpstreamTarget::new(host, port), transport))
        }
        None => balancer
            .next_target()
            .map(|target| (target, TransportKind::Plain))
            .map_err(|e| ProxyError::UpstreamUnavailable(e.to_string())),
    }
}

fn origin_form(uri: &Uri) -> ProxyResult<Uri> {
    uri.path_and_query()
        .map_or("/", |pq| pq.as_str())
        .parse()
        .map_err(|e: hyper::http::uri::InvalidUri| ProxyError::InvalidRequest(e.to_string()))
}
