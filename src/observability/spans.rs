//! Spans that carry correlation fields through nested log events.

use std::net::SocketAddr;
use tracing::Span;
use uuid::Uuid;

/// Span covering one inbound client connection.
pub fn connection_span(peer: SocketAddr, tls: bool) -> Span {
    tracing::info_span!("client", %peer, tls)
}

/// Span covering one proxied request; every event inside carries the id.
pub fn request_span(request_id: Uuid, method: &hyper::Method, uri: &hyper::Uri) -> Span {
    tracing::info_span!("request", %request_id, %method, %uri)
}
